/// Source feature maps of the SSD300 detector, finest first.
///
/// Liu et al. - Pg 3, Multi-scale feature maps for detection
///
/// We add convolutional feature layers to the end of the truncated base network. These
/// layers decrease in size progressively and allow predictions of detections at multiple
/// scales.
///
/// The position of a variant in [`SSDConvLayers::as_list`] is the index of its scale in
/// [`crate::config::MultiBoxConfig`], so prediction heads and anchors line up.
#[repr(usize)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SSDConvLayers {
    /// Last VGG16 conv4 layer, L2 normalized before its head.
    Conv4_3,
    /// Former fully connected FC7, converted to a 1x1 convolution.
    Conv7,
    Conv8_2,
    Conv9_2,
    Conv10_2,
    Conv11_2,
}

impl SSDConvLayers {
    pub fn as_list() -> Vec<SSDConvLayers> {
        vec![
            SSDConvLayers::Conv4_3,
            SSDConvLayers::Conv7,
            SSDConvLayers::Conv8_2,
            SSDConvLayers::Conv9_2,
            SSDConvLayers::Conv10_2,
            SSDConvLayers::Conv11_2,
        ]
    }

    pub fn count() -> usize {
        Self::as_list().len()
    }

    /// 1-based position of the layer in the detection pipeline.
    pub fn get_id(&self) -> usize {
        *self as usize + 1
    }

    /// Number of channels feeding the prediction head of this layer.
    pub fn output_size(&self) -> usize {
        match self {
            SSDConvLayers::Conv4_3 => 512,
            SSDConvLayers::Conv7 => 1024,
            SSDConvLayers::Conv8_2 => 512,
            SSDConvLayers::Conv9_2 => 256,
            SSDConvLayers::Conv10_2 => 256,
            SSDConvLayers::Conv11_2 => 256,
        }
    }

    /// Side of the square feature map for a 300x300 input.
    pub fn grid(&self) -> usize {
        match self {
            SSDConvLayers::Conv4_3 => 38,
            SSDConvLayers::Conv7 => 19,
            SSDConvLayers::Conv8_2 => 10,
            SSDConvLayers::Conv9_2 => 5,
            SSDConvLayers::Conv10_2 => 3,
            SSDConvLayers::Conv11_2 => 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MultiBoxConfig;

    #[test]
    fn test_as_list_order() {
        let layers = SSDConvLayers::as_list();
        assert_eq!(layers.len(), 6);
        assert_eq!(layers[0], SSDConvLayers::Conv4_3);
        assert_eq!(layers[5], SSDConvLayers::Conv11_2);
    }

    #[test]
    fn test_get_id_is_one_based() {
        for (index, layer) in SSDConvLayers::as_list().iter().enumerate() {
            assert_eq!(layer.get_id(), index + 1);
        }
    }

    #[test]
    fn test_grids_match_ssd300_config() {
        let grids: Vec<usize> = SSDConvLayers::as_list().iter().map(|l| l.grid()).collect();
        assert_eq!(grids, MultiBoxConfig::ssd300().grids);
    }
}
