//! In-memory table of the client component instances known to the daemon.

use std::fmt;
use std::sync::Arc;

use rm_proto::ComponentHandle;
use thiserror::Error;

use crate::domain::category::Category;
use crate::domain::channel::ResponseChannel;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum RegistryError {
    #[error("registry full: {capacity} components already registered")]
    CapacityExceeded { capacity: usize },
}

/// Identity of a component instance. The handle alone is not unique across processes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ComponentKey {
    pub handle: ComponentHandle,
    pub pid: u32,
}

impl ComponentKey {
    pub fn new(handle: ComponentHandle, pid: u32) -> Self {
        Self { handle, pid }
    }
}

impl fmt::Display for ComponentKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}@{}", self.handle, self.pid)
    }
}

/// OMX component state as reported by `StateSet`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OmxState {
    Invalid,
    Loaded,
    Idle,
    Executing,
    Pause,
    WaitForResources,
}

impl OmxState {
    pub fn from_wire(value: u32) -> Option<Self> {
        match value {
            0 => Some(Self::Invalid),
            1 => Some(Self::Loaded),
            2 => Some(Self::Idle),
            3 => Some(Self::Executing),
            4 => Some(Self::Pause),
            5 => Some(Self::WaitForResources),
            _ => None,
        }
    }

    pub fn to_wire(self) -> u32 {
        match self {
            Self::Invalid => 0,
            Self::Loaded => 1,
            Self::Idle => 2,
            Self::Executing => 3,
            Self::Pause => 4,
            Self::WaitForResources => 5,
        }
    }
}

/// Arbitration status of a component.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ArbitrationStatus {
    #[default]
    None,
    WaitingForPolicy,
    WaitingForResource,
    /// Granted and running.
    ComponentActive,
    /// Denied, preempted or hit by a fatal fault; the client has to react.
    WaitingForClient,
}

/// Why a component is waiting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DenyReason {
    #[default]
    None,
    Policy,
    Resource,
}

/// Cycles a record currently contributes to the aggregate counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Commitment {
    pub category: Category,
    pub mhz: u32,
}

#[derive(Debug, Clone)]
pub struct ComponentRecord {
    pub key: ComponentKey,
    pub channel: Option<Arc<dyn ResponseChannel>>,
    pub state: OmxState,
    pub status: ArbitrationStatus,
    pub reason: DenyReason,
    pub category: Option<Category>,
    pub cpu_budget: u32,
    pub(crate) committed: Option<Commitment>,
}

impl ComponentRecord {
    fn new(key: ComponentKey, channel: Option<Arc<dyn ResponseChannel>>, cpu_budget: u32) -> Self {
        Self {
            key,
            channel,
            state: OmxState::Idle,
            status: ArbitrationStatus::None,
            reason: DenyReason::None,
            category: None,
            cpu_budget,
            committed: None,
        }
    }

    pub fn committed(&self) -> Option<Commitment> {
        self.committed
    }
}

/// Bounded, insertion-ordered component table.
#[derive(Debug)]
pub struct ComponentRegistry {
    components: Vec<ComponentRecord>,
    capacity: usize,
}

impl ComponentRegistry {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            components: Vec::with_capacity(capacity),
            capacity,
        }
    }

    /// Inserts a record for `key` unless one exists.
    ///
    /// An existing record keeps its state, status and budget; it only picks up
    /// `channel` if it had none.
    pub fn register(
        &mut self,
        key: ComponentKey,
        channel: Option<Arc<dyn ResponseChannel>>,
        cpu_budget: u32,
    ) -> Result<&mut ComponentRecord, RegistryError> {
        if let Some(index) = self.index_of(key) {
            let record = &mut self.components[index];
            if record.channel.is_none() {
                record.channel = channel;
            }
            return Ok(record);
        }

        if self.components.len() >= self.capacity {
            return Err(RegistryError::CapacityExceeded {
                capacity: self.capacity,
            });
        }

        tracing::debug!(component = %key, cpu_budget, "registering component");
        self.components
            .push(ComponentRecord::new(key, channel, cpu_budget));
        let last = self.components.len() - 1;
        Ok(&mut self.components[last])
    }

    pub fn lookup(&self, key: ComponentKey) -> Option<&ComponentRecord> {
        self.components.iter().find(|c| c.key == key)
    }

    pub fn lookup_mut(&mut self, key: ComponentKey) -> Option<&mut ComponentRecord> {
        self.components.iter_mut().find(|c| c.key == key)
    }

    /// Removes the record for `key`, shifting later records down. No-op if absent.
    pub fn remove(&mut self, key: ComponentKey) -> Option<ComponentRecord> {
        let index = self.index_of(key)?;
        tracing::debug!(component = %key, "removing component");
        Some(self.components.remove(index))
    }

    /// Records in the Executing state, optionally restricted to one category.
    pub fn executing(
        &self,
        category: Option<Category>,
    ) -> impl Iterator<Item = &ComponentRecord> + '_ {
        self.components.iter().filter(move |c| {
            c.state == OmxState::Executing && category.map_or(true, |cat| c.category == Some(cat))
        })
    }

    pub fn iter(&self) -> impl Iterator<Item = &ComponentRecord> + '_ {
        self.components.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut ComponentRecord> + '_ {
        self.components.iter_mut()
    }

    pub fn len(&self) -> usize {
        self.components.len()
    }

    pub fn is_empty(&self) -> bool {
        self.components.is_empty()
    }

    fn index_of(&self, key: ComponentKey) -> Option<usize> {
        self.components.iter().position(|c| c.key == key)
    }
}
