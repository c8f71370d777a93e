// ============================================================
// Layer 2 - Caption Use Case
// ============================================================
// Captions one image with a trained checkpoint:
//
//   Step 1: Open the checkpoint directory     (Layer 6 - infra)
//   Step 2: Load the saved vocabulary         (Layer 6 - infra)
//   Step 3: Rebuild the model, load weights   (Layer 5 - ml)
//   Step 4: Decode the image and caption it   (Layers 4 + 5)
//
// Inference needs no gradients, so the plain (non-autodiff)
// backend is used for whichever device was chosen.

use std::path::PathBuf;

use anyhow::Result;
use burn::prelude::*;

use crate::application::train_use_case::DeviceKind;
use crate::infra::{checkpoint::CheckpointManager, vocab_store::VocabStore};
use crate::ml::inferencer::{AttentionFocus, Captioner};

/// What the `caption` command asks for.
#[derive(Debug, Clone)]
pub struct CaptionRequest {
    pub image:          PathBuf,
    pub checkpoint_dir: PathBuf,
    /// Latest saved epoch when `None`
    pub epoch:          Option<usize>,
    pub device:         DeviceKind,
}

/// The caption plus where the model looked for each word.
#[derive(Debug, Clone)]
pub struct CaptionResult {
    pub text:  String,
    pub epoch: usize,
    pub focus: Vec<AttentionFocus>,
}

pub struct CaptionUseCase {
    request: CaptionRequest,
}

impl CaptionUseCase {
    pub fn new(request: CaptionRequest) -> Self {
        Self { request }
    }

    pub fn execute(&self) -> Result<CaptionResult> {
        match self.request.device {
            DeviceKind::Wgpu => {
                let device = burn::backend::wgpu::WgpuDevice::default();
                tracing::info!("Using WGPU device: {:?}", device);
                self.run::<burn::backend::Wgpu>(device)
            }
            DeviceKind::Cpu => {
                tracing::info!("Using CPU (ndarray) device");
                self.run::<burn::backend::NdArray>(burn::backend::ndarray::NdArrayDevice::default())
            }
        }
    }

    fn run<B: Backend>(&self, device: B::Device) -> Result<CaptionResult> {
        let req = &self.request;

        let checkpoints = CheckpointManager::open(&req.checkpoint_dir)?;
        let vocab       = VocabStore::new(&req.checkpoint_dir).load()?;
        let captioner   = Captioner::<B>::from_checkpoint(&checkpoints, vocab, req.epoch, device)?;

        let output = captioner.caption_file(&req.image)?;
        let focus  = output.focus(captioner.vocab());
        Ok(CaptionResult { text: output.text, epoch: output.epoch, focus })
    }
}
