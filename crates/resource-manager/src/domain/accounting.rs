//! Aggregate cycle accounting per resource category.

use crate::domain::category::Category;
use crate::domain::registry::{Commitment, ComponentRecord, OmxState};

/// Running totals of committed MHz, one per category.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AggregateCounters {
    per_category: [u32; 5],
}

impl AggregateCounters {
    pub fn get(&self, category: Category) -> u32 {
        self.per_category[category.slot()]
    }

    pub fn total(&self) -> u32 {
        self.per_category.iter().sum()
    }

    fn add(&mut self, commitment: Commitment) {
        let slot = &mut self.per_category[commitment.category.slot()];
        *slot = slot.saturating_add(commitment.mhz);
    }

    fn sub(&mut self, commitment: Commitment) {
        let slot = &mut self.per_category[commitment.category.slot()];
        *slot = slot.saturating_sub(commitment.mhz);
    }
}

/// Effect of a state transition on the counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CounterChange {
    Unchanged,
    Committed(Commitment),
    Released(Commitment),
}

impl CounterChange {
    pub fn is_change(&self) -> bool {
        !matches!(self, CounterChange::Unchanged)
    }
}

impl AggregateCounters {
    /// Moves `record` to `new_state`, adjusting the counters.
    ///
    /// Idle/Pause to Executing commits the record's budget under its category;
    /// leaving Executing (normally for Idle or Pause) releases what was
    /// committed. A record without a category is moved but never committed.
    pub fn transition(&mut self, record: &mut ComponentRecord, new_state: OmxState) -> CounterChange {
        let previous = record.state;
        record.state = new_state;

        match (previous, new_state) {
            (OmxState::Idle | OmxState::Pause, OmxState::Executing) => {
                let Some(category) = record.category else {
                    tracing::warn!(component = %record.key, "unknown component type, cycles not accounted");
                    return CounterChange::Unchanged;
                };
                if let Some(stale) = record.committed.take() {
                    self.sub(stale);
                }
                let commitment = Commitment {
                    category,
                    mhz: record.cpu_budget,
                };
                self.add(commitment);
                record.committed = Some(commitment);
                CounterChange::Committed(commitment)
            }
            (OmxState::Executing, next) if next != OmxState::Executing => match record.committed.take() {
                Some(commitment) => {
                    self.sub(commitment);
                    CounterChange::Released(commitment)
                }
                None => CounterChange::Unchanged,
            },
            _ => CounterChange::Unchanged,
        }
    }

    /// Releases whatever `record` has committed; used when it leaves the registry.
    pub fn release(&mut self, record: &mut ComponentRecord) -> CounterChange {
        match record.committed.take() {
            Some(commitment) => {
                self.sub(commitment);
                CounterChange::Released(commitment)
            }
            None => CounterChange::Unchanged,
        }
    }
}
