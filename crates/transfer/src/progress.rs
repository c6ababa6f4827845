/// Progress of one send, counted in chunks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferProgress {
    pub completed: u64,
    pub total: u64,
}

impl TransferProgress {
    pub fn new(total: u64) -> Self {
        Self {
            completed: 0,
            total,
        }
    }

    /// Completed fraction in `[0.0, 1.0]`. An empty transfer counts as done.
    pub fn fraction(&self) -> f64 {
        if self.total == 0 {
            return 1.0;
        }
        self.completed as f64 / self.total as f64
    }

    pub fn percentage(&self) -> f64 {
        self.fraction() * 100.0
    }

    pub fn is_complete(&self) -> bool {
        self.completed >= self.total
    }
}
