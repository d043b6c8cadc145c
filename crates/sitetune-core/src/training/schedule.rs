/// Linear warmup from 0 to the base rate, then linear decay to 0 at `total_steps`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LinearSchedule {
    base_lr: f64,
    warmup_steps: u64,
    total_steps: u64,
}

impl LinearSchedule {
    #[must_use]
    pub fn new(base_lr: f64, warmup_steps: u64, total_steps: u64) -> Self {
        Self { base_lr, warmup_steps, total_steps }
    }

    /// Learning rate for the optimizer update with zero-based index `step`.
    #[must_use]
    pub fn lr_at(&self, step: u64) -> f64 {
        if step < self.warmup_steps {
            return self.base_lr * step as f64 / self.warmup_steps.max(1) as f64;
        }
        let remaining = self.total_steps.saturating_sub(step) as f64;
        let span = self.total_steps.saturating_sub(self.warmup_steps).max(1) as f64;
        self.base_lr * (remaining / span).max(0.0)
    }

    #[must_use]
    pub fn total_steps(&self) -> u64 {
        self.total_steps
    }
}
