//! QoS admission oracle: decides whether a cycle and memory claim fits on the
//! DSP right now.

use std::collections::VecDeque;
use std::sync::Arc;

use thiserror::Error;

use crate::domain::platform::Platform;

/// Free heap must exceed the requested size by this many bytes.
const MEMORY_ALIGNMENT_MARGIN: u64 = 4;

#[derive(Error, Debug)]
pub enum DspError {
    #[error("DSP subsystem unavailable: {0}")]
    Unavailable(String),
    #[error("unsupported DSP max frequency {0} MHz")]
    UnsupportedPlatform(u32),
    #[error("malformed DSP data in {source_name}: {value:?}")]
    Malformed { source_name: String, value: String },
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct HeapStats {
    pub free_bytes: u64,
    pub largest_free_block: u64,
}

/// Access to the DSP resource figures.
///
/// `open` and `close` bracket every query sequence.
pub trait DspSubsystem: Send + Sync {
    fn open(&self) -> Result<(), DspError>;

    fn close(&self);

    fn max_frequency_mhz(&self) -> Result<u32, DspError>;

    fn heap_stats(&self) -> Result<HeapStats, DspError>;

    /// Current processor load in MHz.
    fn processor_load(&self) -> Result<u32, DspError>;

    /// Load derived from the DSP component registry, used when
    /// [`DspSubsystem::processor_load`] fails.
    fn registry_load(&self) -> Result<u32, DspError>;
}

/// Identifies the platform from the DSP maximum frequency.
pub fn identify_platform(dsp: &dyn DspSubsystem) -> Result<Platform, DspError> {
    dsp.open()?;
    let max = dsp.max_frequency_mhz();
    dsp.close();
    let max = max?;
    Platform::from_max_frequency(max).ok_or(DspError::UnsupportedPlatform(max))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OracleMode {
    Live,
    /// Every admission succeeds. Never left once entered.
    Stub,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QosVerdict {
    Admit,
    Deny,
}

/// Fixed-depth FIFO of recent load samples.
#[derive(Debug, Clone)]
pub struct CpuLoadHistory {
    depth: usize,
    samples: VecDeque<u32>,
    captured: usize,
}

impl CpuLoadHistory {
    pub fn new(depth: usize) -> Self {
        let depth = depth.max(1);
        Self {
            depth,
            samples: VecDeque::with_capacity(depth),
            captured: 0,
        }
    }

    pub fn push(&mut self, sample: u32) {
        if self.samples.len() == self.depth {
            self.samples.pop_front();
        }
        self.samples.push_back(sample);
        self.captured = (self.captured + 1).min(self.depth);
    }

    /// Number of snapshots captured, saturating at the depth.
    pub fn captured(&self) -> usize {
        self.captured
    }

    pub fn average(&self) -> u32 {
        if self.samples.is_empty() {
            return 0;
        }
        let sum: u64 = self.samples.iter().map(|&s| u64::from(s)).sum();
        (sum / self.samples.len() as u64) as u32
    }

    pub fn samples(&self) -> impl Iterator<Item = u32> + '_ {
        self.samples.iter().copied()
    }
}

pub struct QosOracle {
    dsp: Arc<dyn DspSubsystem>,
    mode: OracleMode,
    history: CpuLoadHistory,
}

impl QosOracle {
    pub fn new(dsp: Arc<dyn DspSubsystem>, history_depth: usize) -> Self {
        Self {
            dsp,
            mode: OracleMode::Live,
            history: CpuLoadHistory::new(history_depth),
        }
    }

    pub fn mode(&self) -> OracleMode {
        self.mode
    }

    pub fn history(&self) -> &CpuLoadHistory {
        &self.history
    }

    pub fn enter_stub(&mut self) {
        if self.mode != OracleMode::Stub {
            tracing::warn!("QoS oracle entering stub mode, all requests will be admitted");
            self.mode = OracleMode::Stub;
        }
    }

    /// Checks `requested_cycles` MHz and `requested_memory` bytes against the
    /// instantaneous DSP headroom.
    ///
    /// The load sample is recorded whether or not the claim is admitted.
    pub fn admit(&mut self, requested_cycles: u32, requested_memory: u64) -> QosVerdict {
        if self.mode == OracleMode::Stub {
            return QosVerdict::Admit;
        }

        if let Err(e) = self.dsp.open() {
            tracing::warn!("cannot open DSP subsystem: {e}");
            self.enter_stub();
            return QosVerdict::Admit;
        }

        let verdict = self.query(requested_cycles, requested_memory);
        self.dsp.close();
        verdict
    }

    fn query(&mut self, requested_cycles: u32, requested_memory: u64) -> QosVerdict {
        let memory_available = if requested_memory == 0 {
            true
        } else {
            match self.dsp.heap_stats() {
                Ok(heap) => {
                    tracing::debug!(
                        free = heap.free_bytes,
                        largest_block = heap.largest_free_block,
                        requested_memory,
                        "DSP heap"
                    );
                    heap.free_bytes > requested_memory.saturating_add(MEMORY_ALIGNMENT_MARGIN)
                }
                Err(e) => {
                    tracing::warn!("DSP heap query failed: {e}");
                    return QosVerdict::Deny;
                }
            }
        };

        let max_frequency = match self.dsp.max_frequency_mhz() {
            Ok(mhz) => mhz,
            Err(e) => {
                tracing::warn!("DSP max frequency query failed: {e}");
                return QosVerdict::Deny;
            }
        };

        let load = match self.dsp.processor_load() {
            Ok(load) => load,
            Err(e) => {
                tracing::debug!("processor load query failed, using registry: {e}");
                match self.dsp.registry_load() {
                    Ok(load) => load,
                    Err(e) => {
                        tracing::warn!("DSP registry load query failed: {e}");
                        return QosVerdict::Deny;
                    }
                }
            }
        };

        self.history.push(load);
        let cycles_available = i64::from(max_frequency) - i64::from(load);
        tracing::debug!(
            max_frequency,
            load,
            average = self.history.average(),
            cycles_available,
            requested_cycles,
            memory_available,
            "QoS check"
        );

        if memory_available && cycles_available >= i64::from(requested_cycles) {
            QosVerdict::Admit
        } else {
            QosVerdict::Deny
        }
    }
}
