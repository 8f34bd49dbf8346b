//! Exclusive device ownership.
//!
//! A camera index may be held by at most one frame source in this process.
//! Acquisition never waits: a held index fails immediately with
//! [`CameraError::DeviceBusy`] so that capture and recognition cannot
//! deadlock on each other.

use crate::camera::CameraError;
use std::collections::HashSet;
use std::sync::{Mutex, OnceLock};

static HELD: OnceLock<Mutex<HashSet<u32>>> = OnceLock::new();

fn held() -> &'static Mutex<HashSet<u32>> {
    HELD.get_or_init(|| Mutex::new(HashSet::new()))
}

/// Proof of exclusive ownership of a camera index. Released on drop.
#[derive(Debug)]
pub struct DeviceLease {
    index: u32,
}

impl DeviceLease {
    /// Claim `index`, failing fast if another holder exists.
    pub fn acquire(index: u32) -> Result<Self, CameraError> {
        let mut set = held().lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if !set.insert(index) {
            tracing::debug!(index, "device lease refused: already held");
            return Err(CameraError::DeviceBusy(index));
        }
        tracing::debug!(index, "device lease acquired");
        Ok(Self { index })
    }

    /// Whether some holder currently owns `index`.
    pub fn is_held(index: u32) -> bool {
        held()
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .contains(&index)
    }

    pub fn index(&self) -> u32 {
        self.index
    }
}

impl Drop for DeviceLease {
    fn drop(&mut self) {
        let mut set = held().lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        set.remove(&self.index);
        tracing::debug!(index = self.index, "device lease released");
    }
}
