//! File-backed view of the DSP resource figures.
//!
//! The DSP bridge driver exports one decimal value per file under a root
//! directory:
//!
//! | file                 | meaning                         |
//! |----------------------|---------------------------------|
//! | `max_frequency_mhz`  | DSP maximum clock               |
//! | `heap_free`          | free bytes in the dynamic heap  |
//! | `heap_largest_block` | largest contiguous free block   |
//! | `load_mhz`           | current processor load          |
//! | `registry_load_mhz`  | load summed over the registry   |

use std::fs;
use std::path::PathBuf;
use std::str::FromStr;

use crate::domain::qos::{DspError, DspSubsystem, HeapStats};

pub struct SysfsDsp {
    root: PathBuf,
}

impl SysfsDsp {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn read<T: FromStr>(&self, name: &str) -> Result<T, DspError> {
        let raw = fs::read_to_string(self.root.join(name))?;
        let value = raw.trim();
        value.parse().map_err(|_| DspError::Malformed {
            source_name: name.to_string(),
            value: value.to_string(),
        })
    }
}

impl DspSubsystem for SysfsDsp {
    fn open(&self) -> Result<(), DspError> {
        if self.root.is_dir() {
            Ok(())
        } else {
            Err(DspError::Unavailable(format!(
                "{} is not a directory",
                self.root.display()
            )))
        }
    }

    fn close(&self) {}

    fn max_frequency_mhz(&self) -> Result<u32, DspError> {
        self.read("max_frequency_mhz")
    }

    fn heap_stats(&self) -> Result<HeapStats, DspError> {
        Ok(HeapStats {
            free_bytes: self.read("heap_free")?,
            largest_free_block: self.read("heap_largest_block")?,
        })
    }

    fn processor_load(&self) -> Result<u32, DspError> {
        self.read("load_mhz")
    }

    fn registry_load(&self) -> Result<u32, DspError> {
        self.read("registry_load_mhz")
    }
}

#[cfg(test)]
mod tests {
    use similar_asserts::assert_eq;
    use test_log::test;

    use super::*;
    use crate::domain::platform::Platform;
    use crate::domain::qos::identify_platform;

    fn dsp_dir(files: &[(&str, &str)]) -> tempfile::TempDir {
        let dir = tempfile::tempdir().expect("tempdir");
        for (name, value) in files {
            fs::write(dir.path().join(name), value).expect("write");
        }
        dir
    }

    #[test]
    fn reads_figures_from_files() {
        let dir = dsp_dir(&[
            ("max_frequency_mhz", "430\n"),
            ("heap_free", "65536"),
            ("heap_largest_block", "32768"),
            ("load_mhz", " 120 "),
        ]);
        let dsp = SysfsDsp::new(dir.path());

        assert!(dsp.open().is_ok());
        assert_eq!(dsp.max_frequency_mhz().ok(), Some(430));
        assert_eq!(dsp.processor_load().ok(), Some(120));
        assert_eq!(
            dsp.heap_stats().ok(),
            Some(HeapStats {
                free_bytes: 65536,
                largest_free_block: 32768
            })
        );
        assert!(matches!(dsp.registry_load(), Err(DspError::Io(_))));
        assert_eq!(identify_platform(&dsp).ok(), Some(Platform::Omap3430));
    }

    #[test]
    fn malformed_value_is_reported() {
        let dir = dsp_dir(&[("load_mhz", "busy")]);
        let dsp = SysfsDsp::new(dir.path());
        assert!(matches!(
            dsp.processor_load(),
            Err(DspError::Malformed { .. })
        ));
    }

    #[test]
    fn missing_root_is_unavailable() {
        let dsp = SysfsDsp::new("/nonexistent/dsp");
        assert!(matches!(dsp.open(), Err(DspError::Unavailable(_))));
    }
}
