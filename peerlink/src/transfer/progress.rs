//! Transfer progress as a whole percentage.

/// `round(done * 100 / total)`, clamped to `0..=100`.
///
/// 100 is reserved for `done >= total`; an unfinished transfer that rounds up
/// reports 99. A transfer with nothing to send is complete.
pub fn percent(done: u64, total: u64) -> u8 {
    if total == 0 || done >= total {
        return 100;
    }
    let rounded = (done as u128 * 100 + total as u128 / 2) / total as u128;
    rounded.min(99) as u8
}

/// Reports progress only when the percentage increases; 0 % is never reported.
#[derive(Debug, Default, Clone)]
pub struct ProgressTracker {
    last: u8,
}

impl ProgressTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the new percentage if it is higher than the last one reported.
    pub fn update(&mut self, done: u64, total: u64) -> Option<u8> {
        let value = percent(done, total);
        if value > self.last {
            self.last = value;
            Some(value)
        } else {
            None
        }
    }

    pub fn last(&self) -> u8 {
        self.last
    }

    pub fn reset(&mut self) {
        self.last = 0;
    }
}
