use std::fs;
use std::path::PathBuf;
use std::sync::Mutex;

use crate::domain::platform::{ConstraintSink, Platform};

/// Writes the DSP operating point for the committed cycle total to sysfs.
pub struct SysfsConstraint {
    platform: Platform,
    path: PathBuf,
    last: Mutex<Option<u8>>,
}

impl SysfsConstraint {
    pub fn new(platform: Platform, path: impl Into<PathBuf>) -> Self {
        Self {
            platform,
            path: path.into(),
            last: Mutex::new(None),
        }
    }
}

impl ConstraintSink for SysfsConstraint {
    fn apply(&self, total_mhz: u32) {
        let opp = self.platform.operating_point_for(total_mhz);
        let mut last = self.last.lock().expect("poisoned");
        if *last == Some(opp) {
            return;
        }
        match fs::write(&self.path, opp.to_string()) {
            Ok(()) => {
                tracing::info!(total_mhz, opp, platform = %self.platform, "DSP operating point set");
                *last = Some(opp);
            }
            Err(e) => tracing::warn!(path = %self.path.display(), opp, "failed to set DSP operating point: {e}"),
        }
    }
}
