// ============================================================
// Layer 5 - Learning Rate Schedule
// ============================================================
// Geometric per-epoch decay:
//
//   lr(e) = base_lr * gamma^e      e = epochs completed so far
//
// With gamma = 0.95 the rate halves roughly every 13.5 epochs.
// The training loop reads `lr()` for every optimiser step and
// calls `step()` once after each finished epoch.

/// Learning rate scheduler
pub trait LrScheduler {
    /// Rate to use for the next optimiser step
    fn lr(&self) -> f64;

    /// Advance by one epoch
    fn step(&mut self);
}

#[derive(Debug, Clone)]
pub struct EpochDecay {
    base_lr:          f64,
    gamma:            f64,
    epochs_completed: usize,
}

impl EpochDecay {
    pub fn new(base_lr: f64, gamma: f64) -> Self {
        Self { base_lr, gamma, epochs_completed: 0 }
    }

    pub fn epochs_completed(&self) -> usize {
        self.epochs_completed
    }
}

impl LrScheduler for EpochDecay {
    fn lr(&self) -> f64 {
        self.base_lr * self.gamma.powi(self.epochs_completed as i32)
    }

    fn step(&mut self) {
        self.epochs_completed += 1;
    }
}
