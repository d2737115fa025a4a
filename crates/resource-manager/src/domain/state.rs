use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::domain::accounting::{AggregateCounters, CounterChange};
use crate::domain::registry::{ComponentKey, ComponentRecord, ComponentRegistry};

/// State shared by the dispatcher and the fault monitor.
#[derive(Debug)]
pub struct CoreState {
    pub registry: ComponentRegistry,
    pub counters: AggregateCounters,
}

impl CoreState {
    pub fn new(max_components: usize) -> Self {
        Self {
            registry: ComponentRegistry::with_capacity(max_components),
            counters: AggregateCounters::default(),
        }
    }

    /// Removes `key` from the registry, releasing its committed cycles.
    pub fn remove_component(&mut self, key: ComponentKey) -> Option<(ComponentRecord, CounterChange)> {
        let mut record = self.registry.remove(key)?;
        let change = self.counters.release(&mut record);
        Some((record, change))
    }
}

/// Mutex-guarded [`CoreState`]. Never hold the guard across `.await` or a channel write.
#[derive(Debug, Clone)]
pub struct SharedState(Arc<Mutex<CoreState>>);

impl SharedState {
    pub fn new(max_components: usize) -> Self {
        Self(Arc::new(Mutex::new(CoreState::new(max_components))))
    }

    pub fn lock(&self) -> MutexGuard<'_, CoreState> {
        self.0.lock().expect("poisoned")
    }
}

/// Set while the fault monitor is recovering from a DSP fault.
///
/// While set, no client request is granted or denied; they all receive
/// `FatalError`.
#[derive(Debug, Clone, Default)]
pub struct RecoveryFlag(Arc<AtomicBool>);

impl RecoveryFlag {
    pub fn begin(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn clear(&self) {
        self.0.store(false, Ordering::SeqCst);
    }

    pub fn in_progress(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}
