// ============================================================
// Layer 4 - Caption Batch Collator
// ============================================================
// Implements Burn's Batcher trait to turn a Vec<CaptionItem> into
// one image tensor and one padded caption tensor.
//
// Captions have different lengths, so they are right-padded with
// the vocabulary's <PAD> id up to the longest caption IN THIS BATCH
// (not the longest in the dataset):
//
//   <START> a  dog <END>                 <START> a  dog <END> <PAD> <PAD>
//   <START> a  cat is  on  <END>    →    <START> a  cat is    on    <END>
//   <START> two <END>                    <START> two <END> <PAD> <PAD> <PAD>
//
// Output shapes:
//   images   [batch, channels, height, width]
//   captions [batch, max_len_in_batch]
//
// Images are stacked as-is; they must all share one shape.

use std::marker::PhantomData;

use burn::{
    data::dataloader::batcher::Batcher,
    prelude::*,
    tensor::TensorData,
};

use crate::data::dataset::CaptionItem;
use crate::domain::error::CaptionError;

// ─── CaptionBatch ─────────────────────────────────────────────────────────────
#[derive(Debug, Clone)]
pub struct CaptionBatch<B: Backend> {
    /// Shape: [batch_size, channels, height, width]
    pub images: Tensor<B, 4>,

    /// Shape: [batch_size, max_len]; tail positions hold the pad id
    pub captions: Tensor<B, 2, Int>,

    /// Which image each row came from, for logging examples
    pub image_ids: Vec<String>,
}

// ─── CaptionBatcher ───────────────────────────────────────────────────────────
#[derive(Clone, Debug)]
pub struct CaptionBatcher<B: Backend> {
    pad_id:   u32,
    _backend: PhantomData<B>,
}

impl<B: Backend> CaptionBatcher<B> {
    pub fn new(pad_id: u32) -> Self {
        Self { pad_id, _backend: PhantomData }
    }

    /// Stack images and pad captions.
    ///
    /// # Errors
    /// `EmptyBatch` for no items, `Shape` if two images differ in shape.
    pub fn collate(
        &self,
        items:  Vec<CaptionItem>,
        device: &B::Device,
    ) -> Result<CaptionBatch<B>, CaptionError> {
        let first = items.first().ok_or(CaptionError::EmptyBatch)?;
        let shape = first.image.shape;
        let batch_size = items.len();

        if let Some(bad) = items.iter().find(|it| it.image.shape != shape) {
            return Err(CaptionError::shape(format!(
                "image '{}' has shape {:?}, batch started with {:?}",
                bad.image_id, bad.image.shape, shape
            )));
        }

        // ── Images: concatenate the CHW buffers ───────────────────────────────
        let pixels: Vec<f32> = items
            .iter()
            .flat_map(|it| it.image.pixels.iter().copied())
            .collect();
        let [c, h, w] = shape;
        let images = Tensor::<B, 4>::from_data(TensorData::new(pixels, [batch_size, c, h, w]), device);

        // ── Captions: right-pad to the batch maximum ──────────────────────────
        let captions: Vec<&[u32]> = items.iter().map(|it| it.caption.as_slice()).collect();
        let (flat, max_len) = pad_captions(&captions, self.pad_id);
        let captions = Tensor::<B, 2, Int>::from_data(TensorData::new(flat, [batch_size, max_len]), device);

        let image_ids = items.into_iter().map(|it| it.image_id).collect();
        Ok(CaptionBatch { images, captions, image_ids })
    }
}

/// Row-major `[n, max_len]` buffer with every caption right-padded by `pad_id`.
pub fn pad_captions(captions: &[&[u32]], pad_id: u32) -> (Vec<i64>, usize) {
    let max_len = captions.iter().map(|c| c.len()).max().unwrap_or(0);
    let mut flat = Vec::with_capacity(captions.len() * max_len);
    for caption in captions {
        flat.extend(caption.iter().map(|&id| id as i64));
        flat.extend(std::iter::repeat(pad_id as i64).take(max_len - caption.len()));
    }
    (flat, max_len)
}

// ─── Burn Batcher Trait Implementation ────────────────────────────────────────
// The DataLoader has no error channel, so a malformed batch is fatal here.
// Images from one dataset are resized to a single shape on load, which keeps
// this branch unreachable in the training pipeline.
impl<B: Backend> Batcher<B, CaptionItem, CaptionBatch<B>> for CaptionBatcher<B> {
    fn batch(&self, items: Vec<CaptionItem>, device: &B::Device) -> CaptionBatch<B> {
        match self.collate(items, device) {
            Ok(batch) => batch,
            Err(e) => panic!("cannot collate caption batch: {e}"),
        }
    }
}
