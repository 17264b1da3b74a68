use std::{fs, path::Path};

use quick_xml::{Reader, events::Event};

use crate::error::{Result, SsdError};

/// The PASCAL Visual Object Classes (VOC) challenge labels, in the order of the
/// development kit. Class index `i` is model id `i + 1`, model id 0 being background.
///
/// “The PASCAL Visual Object Classes (VOC) Challenge”
/// Mark Everingham, Luc Van Gool, Christopher K. I. Williams, John Winn, Andrew Zisserman
/// http://host.robots.ox.ac.uk/pascal/VOC/
pub const VOC_LABELS: [&str; 20] = [
    "aeroplane",
    "bicycle",
    "bird",
    "boat",
    "bottle",
    "bus",
    "car",
    "cat",
    "chair",
    "cow",
    "diningtable",
    "dog",
    "horse",
    "motorbike",
    "person",
    "pottedplant",
    "sheep",
    "sofa",
    "train",
    "tvmonitor",
];

/// Maps VOC class names onto the contiguous class indices the model is trained on.
///
/// Training on a subset of the classes shrinks the confidence heads; indices stay
/// contiguous so cross-entropy can use them directly.
#[derive(Debug, Clone, PartialEq)]
pub struct VocLabels {
    det_classes: Vec<usize>,
}

impl VocLabels {
    /// All 20 VOC classes.
    pub fn voc() -> Self {
        Self {
            det_classes: (0..VOC_LABELS.len()).collect(),
        }
    }

    /// A subset of the VOC classes, in the given order.
    pub fn new(names: &[&str]) -> Result<Self> {
        let det_classes = names
            .iter()
            .map(|name| {
                VOC_LABELS
                    .iter()
                    .position(|label| label == name)
                    .ok_or_else(|| SsdError::UnknownClass(name.to_string()))
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self { det_classes })
    }

    /// Parses a comma separated class list, all classes when absent.
    pub fn from_arg(classes: Option<&str>) -> Result<Self> {
        match classes {
            Some(list) => {
                let names: Vec<&str> = list
                    .split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .collect();
                Self::new(&names)
            }
            None => Ok(Self::voc()),
        }
    }

    /// Number of model classes including background.
    pub fn count(&self) -> usize {
        self.det_classes.len() + 1
    }

    /// Number of object classes, background excluded.
    pub fn len(&self) -> usize {
        self.det_classes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.det_classes.is_empty()
    }

    /// 0-based class index of a VOC name, `None` when the class is not trained on.
    pub fn index_of(&self, name: &str) -> Option<usize> {
        let voc_id = VOC_LABELS.iter().position(|label| *label == name)?;
        self.det_classes.iter().position(|id| *id == voc_id)
    }

    /// Name of a 0-based class index.
    pub fn name(&self, label: usize) -> Option<&'static str> {
        self.det_classes.get(label).map(|id| VOC_LABELS[*id])
    }

    /// Name of a model id, where 0 is background.
    pub fn model_id_to_name(&self, model_id: usize) -> &'static str {
        match model_id {
            0 => "background",
            id => self.name(id - 1).unwrap_or("unknown"),
        }
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.det_classes.iter().map(|id| VOC_LABELS[*id]).collect()
    }
}

/// One `<object>` of an annotation file.
#[derive(Debug, Clone, PartialEq)]
pub struct VocObject {
    pub name: String,
    pub difficult: bool,
    /// `(xmin, ymin, xmax, ymax)` in pixels, as written in the annotation.
    pub bbox: [f32; 4],
}

#[derive(Debug, Clone, PartialEq)]
pub struct Annotation {
    pub filename: Option<String>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub objects: Vec<VocObject>,
}

#[derive(Default)]
struct ObjectBuilder {
    name: Option<String>,
    difficult: bool,
    xmin: Option<f32>,
    ymin: Option<f32>,
    xmax: Option<f32>,
    ymax: Option<f32>,
}

impl ObjectBuilder {
    fn build(self) -> Result<VocObject> {
        Ok(VocObject {
            name: self.name.ok_or(SsdError::MissingField("name"))?,
            difficult: self.difficult,
            bbox: [
                self.xmin.ok_or(SsdError::MissingField("xmin"))?,
                self.ymin.ok_or(SsdError::MissingField("ymin"))?,
                self.xmax.ok_or(SsdError::MissingField("xmax"))?,
                self.ymax.ok_or(SsdError::MissingField("ymax"))?,
            ],
        })
    }
}

fn parse_number<T: std::str::FromStr>(field: &'static str, text: &str) -> Result<T> {
    text.trim().parse().map_err(|_| SsdError::InvalidNumber {
        field,
        value: text.to_string(),
    })
}

/// Parses a VOC annotation document.
///
/// Only top level `<object>` entries count; the `<part>` boxes nested inside person
/// objects are ignored.
pub fn parse_annotation(xml: &str) -> Result<Annotation> {
    let mut reader = Reader::from_str(xml);
    reader.trim_text(true);

    let mut annotation = Annotation {
        filename: None,
        width: None,
        height: None,
        objects: vec![],
    };

    let mut path: Vec<String> = vec![];
    let mut object: Option<ObjectBuilder> = None;

    loop {
        match reader.read_event()? {
            Event::Start(e) => {
                let name = String::from_utf8_lossy(e.name().as_ref()).to_string();

                if name == "object" && path.len() == 1 {
                    object = Some(ObjectBuilder::default());
                }

                path.push(name);
            }
            Event::End(_) => {
                if path.len() == 2 && path[1] == "object" {
                    if let Some(builder) = object.take() {
                        annotation.objects.push(builder.build()?);
                    }
                }

                path.pop();
            }
            Event::Text(e) => {
                let text = e.unescape()?;
                let tags: Vec<&str> = path.iter().skip(1).map(String::as_str).collect();

                match tags.as_slice() {
                    ["filename"] => annotation.filename = Some(text.to_string()),
                    ["size", "width"] => annotation.width = Some(parse_number("width", &text)?),
                    ["size", "height"] => {
                        annotation.height = Some(parse_number("height", &text)?)
                    }
                    ["object", field] => {
                        if let Some(builder) = object.as_mut() {
                            match *field {
                                "name" => builder.name = Some(text.trim().to_string()),
                                "difficult" => {
                                    builder.difficult = parse_number::<u8>("difficult", &text)? != 0
                                }
                                _ => {}
                            }
                        }
                    }
                    ["object", "bndbox", field] => {
                        if let Some(builder) = object.as_mut() {
                            match *field {
                                "xmin" => builder.xmin = Some(parse_number("xmin", &text)?),
                                "ymin" => builder.ymin = Some(parse_number("ymin", &text)?),
                                "xmax" => builder.xmax = Some(parse_number("xmax", &text)?),
                                "ymax" => builder.ymax = Some(parse_number("ymax", &text)?),
                                _ => {}
                            }
                        }
                    }
                    _ => {}
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    Ok(annotation)
}

pub fn load_annotation(path: &Path) -> Result<Annotation> {
    let xml = fs::read_to_string(path).map_err(|e| SsdError::io(path, e))?;
    parse_annotation(&xml)
}
