use std::path::Path;

use candle_core::{DType, Device, Module, Tensor, D};
use candle_nn::{conv2d, linear, Conv2d, Conv2dConfig, Linear, VarBuilder};

use crate::error::ClassifierError;

/// Anything that turns a batch of one `(1, H, W, 3)` u8 image into a score per class.
pub trait Classifier: Send + Sync {
    fn predict(&self, batch: &Tensor) -> Result<Vec<f32>, ClassifierError>;
}

/// Layout of the convolutional network the service serves.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelConfig {
    /// Output channels of each conv block.
    pub conv_filters: Vec<usize>,
    pub dense_units: usize,
    pub num_classes: usize,
    pub image_size: usize,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            conv_filters: vec![32, 64, 128, 256, 512],
            dense_units: 1500,
            num_classes: 38,
            image_size: 128,
        }
    }
}

impl ModelConfig {
    /// Spatial side length left after all conv blocks.
    fn feature_side(&self) -> usize {
        self.conv_filters
            .iter()
            .fold(self.image_size, |side, _| side.saturating_sub(2) / 2)
    }

    fn flattened_len(&self) -> usize {
        let side = self.feature_side();
        let channels = self.conv_filters.last().copied().unwrap_or(3);
        side * side * channels
    }
}

/// Two 3x3 convolutions (same, then valid padding) followed by a 2x2 max pool.
struct ConvBlock {
    same: Conv2d,
    valid: Conv2d,
}

impl ConvBlock {
    fn new(in_c: usize, out_c: usize, vb: VarBuilder) -> candle_core::Result<Self> {
        let same_cfg = Conv2dConfig {
            padding: 1,
            ..Default::default()
        };
        let same = conv2d(in_c, out_c, 3, same_cfg, vb.pp("conv1"))?;
        let valid = conv2d(out_c, out_c, 3, Conv2dConfig::default(), vb.pp("conv2"))?;
        Ok(Self { same, valid })
    }
}

impl Module for ConvBlock {
    fn forward(&self, xs: &Tensor) -> candle_core::Result<Tensor> {
        xs.apply(&self.same)?
            .relu()?
            .apply(&self.valid)?
            .relu()?
            .max_pool2d(2)
    }
}

/// Candle port of the Keras leaf-disease CNN.
///
/// Expects raw 0-255 pixel values; the network was trained without rescaling.
/// Weights use candle layouts: conv kernels OIHW, linear weights `(out, in)`.
pub struct CnnClassifier {
    blocks: Vec<ConvBlock>,
    dense: Linear,
    output: Linear,
    config: ModelConfig,
}

impl CnnClassifier {
    pub fn new(config: ModelConfig, vb: VarBuilder) -> candle_core::Result<Self> {
        if config.feature_side() == 0 {
            candle_core::bail!(
                "image size {} is too small for {} conv blocks",
                config.image_size,
                config.conv_filters.len()
            );
        }
        let mut blocks = Vec::with_capacity(config.conv_filters.len());
        let mut in_c = 3;
        for (i, &out_c) in config.conv_filters.iter().enumerate() {
            blocks.push(ConvBlock::new(in_c, out_c, vb.pp(format!("block{i}")))?);
            in_c = out_c;
        }
        let dense = linear(config.flattened_len(), config.dense_units, vb.pp("dense"))?;
        let output = linear(config.dense_units, config.num_classes, vb.pp("output"))?;
        Ok(Self {
            blocks,
            dense,
            output,
            config,
        })
    }

    /// Loads weights from a safetensors file. Fails if the file is missing,
    /// unreadable, or does not hold every tensor the layout needs.
    pub fn load<P: AsRef<Path>>(path: P, config: ModelConfig) -> candle_core::Result<Self> {
        let device = Device::Cpu;
        let vb = unsafe {
            VarBuilder::from_mmaped_safetensors(&[path.as_ref()], DType::F32, &device)?
        };
        Self::new(config, vb)
    }

    pub fn config(&self) -> &ModelConfig {
        &self.config
    }
}

impl Module for CnnClassifier {
    /// `(B, H, W, 3)` in, `(B, num_classes)` probabilities out.
    fn forward(&self, xs: &Tensor) -> candle_core::Result<Tensor> {
        let mut xs = xs
            .to_dtype(DType::F32)?
            .permute((0, 3, 1, 2))?
            .contiguous()?;
        for block in &self.blocks {
            xs = xs.apply(block)?;
        }
        // Keras flattens channels-last.
        let xs = xs.permute((0, 2, 3, 1))?.contiguous()?.flatten_from(1)?;
        let logits = xs.apply(&self.dense)?.relu()?.apply(&self.output)?;
        candle_nn::ops::softmax(&logits, D::Minus1)
    }
}

impl Classifier for CnnClassifier {
    fn predict(&self, batch: &Tensor) -> Result<Vec<f32>, ClassifierError> {
        let side = self.config.image_size;
        if batch.dims() != [1, side, side, 3] {
            return Err(ClassifierError::other(format!(
                "expected input of shape [1, {side}, {side}, 3], got {:?}",
                batch.dims()
            )));
        }
        let probs = self.forward(batch)?.squeeze(0)?.to_vec1::<f32>()?;
        Ok(probs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_nn::VarMap;

    fn small_config() -> ModelConfig {
        ModelConfig {
            conv_filters: vec![4, 8],
            dense_units: 16,
            num_classes: 38,
            image_size: 32,
        }
    }

    #[test]
    fn default_layout_flattens_to_2048() {
        let config = ModelConfig::default();
        assert_eq!(config.feature_side(), 2);
        assert_eq!(config.flattened_len(), 2 * 2 * 512);
    }

    #[test]
    fn zero_weights_give_uniform_distribution() {
        let vb = VarBuilder::zeros(DType::F32, &Device::Cpu);
        let model = CnnClassifier::new(small_config(), vb).unwrap();
        let batch = Tensor::zeros((1, 32, 32, 3), DType::U8, &Device::Cpu).unwrap();
        let probs = model.predict(&batch).unwrap();
        assert_eq!(probs.len(), 38);
        for p in probs {
            assert!((p - 1.0 / 38.0).abs() < 1e-6);
        }
    }

    #[test]
    fn rejects_wrong_input_shape() {
        let vb = VarBuilder::zeros(DType::F32, &Device::Cpu);
        let model = CnnClassifier::new(small_config(), vb).unwrap();
        let batch = Tensor::zeros((1, 16, 16, 3), DType::U8, &Device::Cpu).unwrap();
        assert!(model.predict(&batch).is_err());
    }

    #[test]
    fn too_many_blocks_for_image_is_an_error() {
        let config = ModelConfig {
            conv_filters: vec![4; 6],
            image_size: 32,
            ..small_config()
        };
        let vb = VarBuilder::zeros(DType::F32, &Device::Cpu);
        assert!(CnnClassifier::new(config, vb).is_err());
    }

    #[test]
    fn loads_saved_weights_deterministically() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("model.safetensors");

        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        let built = CnnClassifier::new(small_config(), vb).unwrap();
        varmap.save(&path).unwrap();

        let loaded = CnnClassifier::load(&path, small_config()).unwrap();
        let pixels: Vec<u8> = (0..32 * 32 * 3).map(|i| (i % 256) as u8).collect();
        let batch = Tensor::from_vec(pixels, (1, 32, 32, 3), &Device::Cpu).unwrap();

        let a = built.predict(&batch).unwrap();
        let b = loaded.predict(&batch).unwrap();
        assert_eq!(a, b);
        let total: f32 = a.iter().sum();
        assert!((total - 1.0).abs() < 1e-4);
    }

    #[test]
    fn missing_model_file_fails() {
        let dir = tempfile::tempdir().unwrap();
        let result = CnnClassifier::load(dir.path().join("absent.safetensors"), small_config());
        assert!(result.is_err());
    }
}
