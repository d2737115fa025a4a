//! Test doubles for the domain seams.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use rm_proto::{ClientResponse, PolicyRequest};
use tokio::sync::mpsc;

use super::channel::{ChannelError, Gateway, ResponseChannel};
use super::fault_monitor::{FaultKind, FaultSource};
use super::platform::ConstraintSink;
use super::policy::{PolicyLink, PolicyLinkError};
use super::qos::{DspError, DspSubsystem, HeapStats};

/// Response channel recording everything written to it.
#[derive(Debug, Default)]
pub struct MockChannel {
    responses: Mutex<Vec<ClientResponse>>,
    closed: AtomicBool,
}

impl MockChannel {
    pub fn responses(&self) -> Vec<ClientResponse> {
        self.responses.lock().unwrap().clone()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

impl ResponseChannel for MockChannel {
    fn send(&self, response: &ClientResponse) -> Result<(), ChannelError> {
        if self.is_closed() {
            return Err(ChannelError::Closed);
        }
        self.responses.lock().unwrap().push(*response);
        Ok(())
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

/// Gateway handing out one [`MockChannel`] per pid, like the per-pid socket path.
#[derive(Default)]
pub struct MockGateway {
    channels: Mutex<HashMap<u32, Arc<MockChannel>>>,
    opens: AtomicUsize,
}

impl MockGateway {
    pub fn channel(&self, pid: u32) -> Option<Arc<MockChannel>> {
        self.channels.lock().unwrap().get(&pid).cloned()
    }

    pub fn open_count(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }
}

impl Gateway for MockGateway {
    fn open(&self, pid: u32) -> Result<Arc<dyn ResponseChannel>, ChannelError> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        let mut channels = self.channels.lock().unwrap();
        let channel: Arc<dyn ResponseChannel> = channels
            .entry(pid)
            .and_modify(|c| {
                if c.is_closed() {
                    *c = Arc::new(MockChannel::default());
                }
            })
            .or_default()
            .clone();
        Ok(channel)
    }
}

#[derive(Default)]
pub struct MockPolicyLink {
    requests: Mutex<Vec<PolicyRequest>>,
    failing: AtomicBool,
}

impl MockPolicyLink {
    pub fn requests(&self) -> Vec<PolicyRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }
}

impl PolicyLink for MockPolicyLink {
    fn send(&self, request: &PolicyRequest) -> Result<(), PolicyLinkError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(PolicyLinkError::Closed);
        }
        self.requests.lock().unwrap().push(*request);
        Ok(())
    }
}

/// DSP with configurable figures. The heap is effectively unlimited by default.
pub struct MockDsp {
    max_mhz: AtomicU32,
    load: AtomicU32,
    registry_load: AtomicU32,
    heap_free: Mutex<u64>,
    fail_open: AtomicBool,
    fail_processor_load: AtomicBool,
    opens: AtomicUsize,
    closes: AtomicUsize,
}

impl MockDsp {
    pub fn new(max_mhz: u32, load: u32) -> Self {
        Self {
            max_mhz: AtomicU32::new(max_mhz),
            load: AtomicU32::new(load),
            registry_load: AtomicU32::new(load),
            heap_free: Mutex::new(u64::MAX / 2),
            fail_open: AtomicBool::new(false),
            fail_processor_load: AtomicBool::new(false),
            opens: AtomicUsize::new(0),
            closes: AtomicUsize::new(0),
        }
    }

    pub fn set_load(&self, load: u32) {
        self.load.store(load, Ordering::SeqCst);
    }

    pub fn set_registry_load(&self, load: u32) {
        self.registry_load.store(load, Ordering::SeqCst);
    }

    pub fn set_heap_free(&self, bytes: u64) {
        *self.heap_free.lock().unwrap() = bytes;
    }

    pub fn fail_open(&self, fail: bool) {
        self.fail_open.store(fail, Ordering::SeqCst);
    }

    pub fn fail_processor_load(&self, fail: bool) {
        self.fail_processor_load.store(fail, Ordering::SeqCst);
    }

    pub fn open_count(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    pub fn close_count(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }
}

impl DspSubsystem for MockDsp {
    fn open(&self) -> Result<(), DspError> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        if self.fail_open.load(Ordering::SeqCst) {
            return Err(DspError::Unavailable("mock".into()));
        }
        Ok(())
    }

    fn close(&self) {
        self.closes.fetch_add(1, Ordering::SeqCst);
    }

    fn max_frequency_mhz(&self) -> Result<u32, DspError> {
        Ok(self.max_mhz.load(Ordering::SeqCst))
    }

    fn heap_stats(&self) -> Result<HeapStats, DspError> {
        let free = *self.heap_free.lock().unwrap();
        Ok(HeapStats {
            free_bytes: free,
            largest_free_block: free,
        })
    }

    fn processor_load(&self) -> Result<u32, DspError> {
        if self.fail_processor_load.load(Ordering::SeqCst) {
            return Err(DspError::Unavailable("load statistics".into()));
        }
        Ok(self.load.load(Ordering::SeqCst))
    }

    fn registry_load(&self) -> Result<u32, DspError> {
        Ok(self.registry_load.load(Ordering::SeqCst))
    }
}

/// Fault source fired through the sender returned by [`MockFaultSource::new`].
pub struct MockFaultSource {
    faults: mpsc::Receiver<FaultKind>,
    fail_attach: Arc<AtomicBool>,
}

impl MockFaultSource {
    pub fn new() -> (Self, mpsc::Sender<FaultKind>) {
        let (tx, rx) = mpsc::channel(4);
        let source = Self {
            faults: rx,
            fail_attach: Arc::new(AtomicBool::new(false)),
        };
        (source, tx)
    }

    pub fn fail_attach(&self, fail: bool) {
        self.fail_attach.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl FaultSource for MockFaultSource {
    async fn attach(&mut self) -> Result<(), DspError> {
        if self.fail_attach.load(Ordering::SeqCst) {
            return Err(DspError::Unavailable("mock attach".into()));
        }
        Ok(())
    }

    async fn wait_for_fault(&mut self) -> Result<FaultKind, DspError> {
        self.faults
            .recv()
            .await
            .ok_or_else(|| DspError::Unavailable("fault trigger dropped".into()))
    }

    async fn close(&mut self) {}
}

#[derive(Default)]
pub struct MockConstraint {
    applied: Mutex<Vec<u32>>,
}

impl MockConstraint {
    pub fn applied(&self) -> Vec<u32> {
        self.applied.lock().unwrap().clone()
    }
}

impl ConstraintSink for MockConstraint {
    fn apply(&self, total_mhz: u32) {
        self.applied.lock().unwrap().push(total_mhz);
    }
}
