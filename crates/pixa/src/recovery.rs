//! # Pending Recovery
//!
//! A generation that was still pending when the previous session ended has no
//! provider call behind it anymore. At startup every such record is resolved:
//!
//! | Credentials | Outcome                                                  |
//! |-------------|----------------------------------------------------------|
//! | absent      | discarded silently; it could not be retried anyway       |
//! | present     | promoted to the completed list as an interrupted record  |
//!
//! A promoted record keeps its data and its empty slots. If its id already
//! exists among completed records (or among records promoted earlier in the
//! same pass) it gets a fresh id.

use std::collections::HashSet;
use uuid::Uuid;

use crate::model::GenerationRecord;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Recovery {
    /// Records to prepend to the completed list, in pending order.
    pub promoted: Vec<GenerationRecord>,
    pub discarded: usize,
}

pub fn recover(
    pending: Vec<GenerationRecord>,
    completed: &[GenerationRecord],
    has_credentials: bool,
) -> Recovery {
    if !has_credentials {
        return Recovery {
            promoted: Vec::new(),
            discarded: pending.len(),
        };
    }

    let mut taken: HashSet<String> = completed.iter().map(|r| r.id.clone()).collect();
    let mut promoted = Vec::with_capacity(pending.len());

    for mut record in pending {
        if taken.contains(&record.id) {
            let fresh = Uuid::new_v4().to_string();
            tracing::info!(old_id = %record.id, new_id = %fresh, "Renamed recovered record to avoid id collision");
            record.id = fresh;
        }
        taken.insert(record.id.clone());
        promoted.push(record);
    }

    Recovery {
        promoted,
        discarded: 0,
    }
}
