// ============================================================
// Layer 4 - Image Decoding
// ============================================================
// Turns an image file into the normalised CHW float buffer the
// feature extractor expects.
//
//   file ──decode──▶ RGB8 ──resize──▶ size×size ──▶ [0,1] ──normalise──▶ CHW f32
//
// The pixel buffer is reference counted because the five captions
// of an image all point at the same pixels.

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use burn::prelude::*;
use burn::tensor::TensorData;
use image::imageops::FilterType;
use image::RgbImage;

/// Per-channel statistics of ImageNet, used by pretrained backbones.
pub const IMAGENET_MEAN: [f32; 3] = [0.485, 0.456, 0.406];
pub const IMAGENET_STD:  [f32; 3] = [0.229, 0.224, 0.225];

/// A decoded, normalised image in channel-first layout.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageTensor {
    /// `[channels, height, width]`
    pub shape:  [usize; 3],
    pub pixels: Arc<[f32]>,
}

impl ImageTensor {
    pub fn new(shape: [usize; 3], pixels: Vec<f32>) -> Result<Self> {
        let expected = shape.iter().product::<usize>();
        anyhow::ensure!(
            pixels.len() == expected,
            "image buffer has {} values, shape {:?} needs {}",
            pixels.len(),
            shape,
            expected
        );
        Ok(Self { shape, pixels: pixels.into() })
    }

    /// Constant-valued image, handy for tests and smoke runs.
    pub fn filled(shape: [usize; 3], value: f32) -> Self {
        let len = shape.iter().product::<usize>();
        Self { shape, pixels: vec![value; len].into() }
    }

    /// Single-image batch `[1, C, H, W]` on `device`.
    pub fn to_batch<B: Backend>(&self, device: &B::Device) -> Tensor<B, 4> {
        let [c, h, w] = self.shape;
        let data = TensorData::new(self.pixels.to_vec(), [1, c, h, w]);
        Tensor::from_data(data, device)
    }
}

/// Decodes and normalises images to a fixed square size.
#[derive(Debug, Clone)]
pub struct ImageLoader {
    size: u32,
    mean: [f32; 3],
    std:  [f32; 3],
}

impl ImageLoader {
    pub fn new(size: usize, mean: [f32; 3], std: [f32; 3]) -> Self {
        Self { size: size as u32, mean, std }
    }

    pub fn size(&self) -> usize {
        self.size as usize
    }

    /// Decode `path`, resize, and normalise.
    pub fn load(&self, path: &Path) -> Result<ImageTensor> {
        let rgb = image::open(path)
            .with_context(|| format!("Cannot decode image '{}'", path.display()))?
            .to_rgb8();
        Ok(self.normalise(&rgb))
    }

    /// Resize an already decoded image and convert it to CHW floats.
    pub fn normalise(&self, img: &RgbImage) -> ImageTensor {
        let resized = if img.dimensions() == (self.size, self.size) {
            img.clone()
        } else {
            image::imageops::resize(img, self.size, self.size, FilterType::Triangle)
        };

        let side = self.size as usize;
        let hw   = side * side;
        let mut data = vec![0f32; 3 * hw];
        for (x, y, p) in resized.enumerate_pixels() {
            let idx = y as usize * side + x as usize;
            for ch in 0..3 {
                let v = p.0[ch] as f32 / 255.0;
                data[ch * hw + idx] = (v - self.mean[ch]) / self.std[ch];
            }
        }

        ImageTensor { shape: [3, side, side], pixels: data.into() }
    }
}
