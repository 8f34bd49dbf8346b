//! Blink counting used to gate recognition.
//!
//! A frame where fewer than two eyes are found counts as one blink. The gate
//! opens once the count exceeds the configured requirement.

#[derive(Debug, Clone)]
pub struct BlinkGate {
    required: u32,
    count: u32,
}

impl BlinkGate {
    pub fn new(required: u32) -> Self {
        Self { required, count: 0 }
    }

    /// Feed one provisional match. Returns `true` once liveness is satisfied.
    pub fn observe(&mut self, eyes_found: usize) -> bool {
        if eyes_found < 2 {
            self.count = self.count.saturating_add(1);
        }
        self.count > self.required
    }

    pub fn reset(&mut self) {
        self.count = 0;
    }

    pub fn count(&self) -> u32 {
        self.count
    }
}
