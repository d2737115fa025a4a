//! Bridge to the external Policy Manager.
//!
//! Requests are correlated by id. At most `max_in_flight` requests are
//! outstanding; the rest wait in a FIFO backlog until a verdict frees a slot.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use rm_proto::{PolicyCommand, PolicyRequest, ProtoError};
use thiserror::Error;

use crate::domain::registry::ComponentKey;

#[derive(Error, Debug)]
pub enum PolicyLinkError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Proto(#[from] ProtoError),
    #[error("policy manager link closed")]
    Closed,
}

/// Outbound half of the Policy Manager connection.
pub trait PolicyLink: Send + Sync {
    fn send(&self, request: &PolicyRequest) -> Result<(), PolicyLinkError>;
}

#[derive(Clone)]
pub enum PolicyMode {
    Live(Arc<dyn PolicyLink>),
    /// No Policy Manager; requests go straight to QoS admission.
    Bypass,
}

impl std::fmt::Debug for PolicyMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PolicyMode::Live(_) => f.write_str("Live"),
            PolicyMode::Bypass => f.write_str("Bypass"),
        }
    }
}

/// A resource request waiting for the Policy Manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingRequest {
    pub key: ComponentKey,
    pub component_type: u32,
    pub requested_cycles: u32,
    pub requested_memory: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Submission {
    Bypassed,
    Sent(u64),
    Queued,
}

pub struct PolicyBridge {
    mode: PolicyMode,
    next_request_id: u64,
    in_flight: HashMap<u64, PendingRequest>,
    backlog: VecDeque<PendingRequest>,
    max_in_flight: usize,
}

impl PolicyBridge {
    pub fn new(mode: PolicyMode, max_in_flight: usize) -> Self {
        Self {
            mode,
            next_request_id: 1,
            in_flight: HashMap::new(),
            backlog: VecDeque::new(),
            max_in_flight: max_in_flight.max(1),
        }
    }

    pub fn is_bypassed(&self) -> bool {
        matches!(self.mode, PolicyMode::Bypass)
    }

    pub fn in_flight_len(&self) -> usize {
        self.in_flight.len()
    }

    pub fn backlog_len(&self) -> usize {
        self.backlog.len()
    }

    /// Forwards `request` if a slot is free, queues it otherwise.
    ///
    /// On a link failure the request is dropped and the error returned.
    pub fn submit(&mut self, request: PendingRequest) -> Result<Submission, PolicyLinkError> {
        let PolicyMode::Live(link) = &self.mode else {
            return Ok(Submission::Bypassed);
        };
        if self.in_flight.len() >= self.max_in_flight || !self.backlog.is_empty() {
            tracing::debug!(
                component = %request.key,
                backlog = self.backlog.len() + 1,
                "policy slot busy, queueing request"
            );
            self.backlog.push_back(request);
            return Ok(Submission::Queued);
        }
        let link = link.clone();
        self.forward(&link, request).map(Submission::Sent)
    }

    /// Forwards queued requests while slots are free. Returns the requests
    /// that could not be written.
    pub fn pump(&mut self) -> Vec<(PendingRequest, PolicyLinkError)> {
        let mut failed = Vec::new();
        let PolicyMode::Live(link) = &self.mode else {
            return failed;
        };
        let link = link.clone();
        while self.in_flight.len() < self.max_in_flight {
            let Some(request) = self.backlog.pop_front() else {
                break;
            };
            if let Err(e) = self.forward(&link, request) {
                failed.push((request, e));
            }
        }
        failed
    }

    /// Takes the in-flight request answered by a verdict.
    ///
    /// Verdicts without a correlation id are matched by component.
    pub fn resolve(&mut self, request_id: Option<u64>, key: ComponentKey) -> Option<PendingRequest> {
        match request_id {
            Some(id) => self.in_flight.remove(&id),
            None => {
                let id = self
                    .in_flight
                    .iter()
                    .filter(|(_, pending)| pending.key == key)
                    .map(|(id, _)| *id)
                    .min()?;
                self.in_flight.remove(&id)
            }
        }
    }

    /// Drops a request of `key` that has not been forwarded yet.
    pub fn cancel_queued(&mut self, key: ComponentKey) -> bool {
        let before = self.backlog.len();
        self.backlog.retain(|pending| pending.key != key);
        before != self.backlog.len()
    }

    /// Tells the Policy Manager the component released its policy grant.
    pub fn free_policy(&mut self, key: ComponentKey, component_type: u32) {
        self.notify(PolicyCommand::FreePolicy, key, component_type);
    }

    /// Tells the Policy Manager a granted request failed the QoS check.
    pub fn free_resources(&mut self, key: ComponentKey, component_type: u32) {
        self.notify(PolicyCommand::FreeResources, key, component_type);
    }

    fn forward(&mut self, link: &Arc<dyn PolicyLink>, request: PendingRequest) -> Result<u64, PolicyLinkError> {
        let request_id = self.allocate_id();
        let wire = PolicyRequest {
            request_id,
            command: PolicyCommand::RequestPolicy,
            handle: request.key.handle,
            pid: request.key.pid,
            component_type: request.component_type,
        };
        link.send(&wire)?;
        tracing::debug!(component = %request.key, request_id, "policy request sent");
        self.in_flight.insert(request_id, request);
        Ok(request_id)
    }

    fn notify(&mut self, command: PolicyCommand, key: ComponentKey, component_type: u32) {
        let PolicyMode::Live(link) = &self.mode else {
            return;
        };
        let link = link.clone();
        let request = PolicyRequest {
            request_id: 0,
            command,
            handle: key.handle,
            pid: key.pid,
            component_type,
        };
        if let Err(e) = link.send(&request) {
            tracing::warn!(component = %key, ?command, "failed to notify policy manager: {e}");
        }
    }

    fn allocate_id(&mut self) -> u64 {
        let id = self.next_request_id;
        self.next_request_id = self.next_request_id.wrapping_add(1).max(1);
        id
    }
}
