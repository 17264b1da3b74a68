use std::{
    fs,
    path::{Path, PathBuf},
};

use burn::data::dataset::Dataset;
use image::RgbImage;
use tracing::{debug, info, warn};

use crate::{
    error::{Result, SsdError},
    voc::{VocLabels, load_annotation},
};

/// One annotated image of a VOC split.
#[derive(Debug, Clone)]
pub struct VocItem {
    pub id: String,
    pub image: RgbImage,
    /// `(x1, y1, x2, y2)` in pixels.
    pub boxes: Vec<[f32; 4]>,
    /// 0-based class indices of `boxes`.
    pub labels: Vec<usize>,
}

/// A Pascal VOC directory (`Annotations/`, `ImageSets/Main/`, `JPEGImages/`) read through
/// one image set such as `trainval`.
#[derive(Debug, Clone)]
pub struct VocDataset {
    root: PathBuf,
    ids: Vec<String>,
    labels: VocLabels,
    use_difficult: bool,
}

impl VocDataset {
    pub fn new(root: impl AsRef<Path>, split: &str, labels: VocLabels) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        let list = root.join("ImageSets").join("Main").join(format!("{split}.txt"));

        let ids: Vec<String> = fs::read_to_string(&list)
            .map_err(|e| SsdError::io(&list, e))?
            .lines()
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .map(String::from)
            .collect();

        if ids.is_empty() {
            return Err(SsdError::EmptyDataset(list));
        }

        info!(split, samples = ids.len(), root = %root.display(), "VOC image set loaded");

        Ok(Self {
            root,
            ids,
            labels,
            use_difficult: true,
        })
    }

    /// Whether objects flagged `difficult` are kept, the default.
    pub fn with_difficult(mut self, use_difficult: bool) -> Self {
        self.use_difficult = use_difficult;
        self
    }

    pub fn ids(&self) -> &[String] {
        &self.ids
    }

    pub fn labels(&self) -> &VocLabels {
        &self.labels
    }

    /// Reads the image and annotation of sample `index`.
    ///
    /// Objects of classes outside the label map, and difficult objects when they are
    /// disabled, are left out.
    pub fn load(&self, index: usize) -> Result<VocItem> {
        let id = &self.ids[index];

        let image_path = self.root.join("JPEGImages").join(format!("{id}.jpg"));
        let image = image::open(&image_path)
            .map_err(|e| SsdError::image(&image_path, e))?
            .to_rgb8();

        let annotation_path = self.root.join("Annotations").join(format!("{id}.xml"));
        let annotation = load_annotation(&annotation_path)?;

        let mut boxes = vec![];
        let mut labels = vec![];

        for object in annotation.objects {
            if object.difficult && !self.use_difficult {
                continue;
            }

            match self.labels.index_of(&object.name) {
                Some(label) => {
                    boxes.push(object.bbox);
                    labels.push(label);
                }
                None => debug!(id = %id, class = %object.name, "skipping object"),
            }
        }

        Ok(VocItem {
            id: id.clone(),
            image,
            boxes,
            labels,
        })
    }
}

impl Dataset<VocItem> for VocDataset {
    /// Loads sample `index`. A sample that cannot be read is logged and replaced by the
    /// next readable one, so a broken file never ends an epoch early.
    fn get(&self, index: usize) -> Option<VocItem> {
        if index >= self.ids.len() {
            return None;
        }

        (0..self.ids.len())
            .map(|offset| (index + offset) % self.ids.len())
            .find_map(|i| match self.load(i) {
                Ok(item) => Some(item),
                Err(e) => {
                    warn!(id = %self.ids[i], error = %e, "skipping unreadable sample");
                    None
                }
            })
    }

    fn len(&self) -> usize {
        self.ids.len()
    }
}
