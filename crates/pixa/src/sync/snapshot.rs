use std::collections::BTreeMap;

use crate::model::{FavoriteSet, GenerationRecord};

/// What the remote is known to hold, as of the last successful push or merge.
///
/// Records are tracked by id together with their filled slot count, so a
/// record whose interrupted slots were later filled by a retry is pushed
/// again, while an unchanged record never is. Both halves are compared by
/// value.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncSnapshot {
    records: BTreeMap<String, usize>,
    favorites: FavoriteSet,
}

impl SyncSnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_state(record: &GenerationRecord) -> (String, usize) {
        (record.id.clone(), record.filled_slots())
    }

    /// Records in `local` the remote does not hold in their current state.
    pub fn record_delta<'a>(&self, local: &'a [GenerationRecord]) -> Vec<&'a GenerationRecord> {
        local
            .iter()
            .filter(|record| self.records.get(&record.id) != Some(&record.filled_slots()))
            .collect()
    }

    pub fn favorites_changed(&self, local: &FavoriteSet) -> bool {
        &self.favorites != local
    }

    pub fn mark_records<'a>(&mut self, pushed: impl IntoIterator<Item = &'a GenerationRecord>) {
        self.records.extend(pushed.into_iter().map(Self::record_state));
    }

    pub fn forget_record(&mut self, id: &str) {
        self.records.remove(id);
    }

    pub fn mark_favorites(&mut self, favorites: FavoriteSet) {
        self.favorites = favorites;
    }

    pub fn knows_record(&self, id: &str) -> bool {
        self.records.contains_key(id)
    }

    pub fn favorites(&self) -> &FavoriteSet {
        &self.favorites
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{BlobKey, FavoriteKey, GenerationOptions, ImageData};

    fn record(count: usize) -> GenerationRecord {
        GenerationRecord::new_pending(
            "p",
            &GenerationOptions {
                image_count: count,
                ..Default::default()
            },
            vec![],
        )
    }

    #[test]
    fn unchanged_records_are_not_in_delta() {
        let records = vec![record(1), record(2)];
        let mut snapshot = SyncSnapshot::new();
        assert_eq!(snapshot.record_delta(&records).len(), 2);

        snapshot.mark_records(&records);

        assert!(snapshot.record_delta(&records).is_empty());
    }

    #[test]
    fn filling_a_slot_puts_record_back_in_delta() {
        let mut records = vec![record(2)];
        let mut snapshot = SyncSnapshot::new();
        snapshot.mark_records(&records);

        records[0].images[1] = ImageData::Reference(BlobKey::output(&records[0].id, 1));

        let delta = snapshot.record_delta(&records);
        assert_eq!(delta.len(), 1);
        assert_eq!(delta[0].id, records[0].id);
    }

    #[test]
    fn favorites_compared_by_value() {
        let mut snapshot = SyncSnapshot::new();
        let favorites: FavoriteSet = [FavoriteKey::new("g", 0)].into_iter().collect();
        assert!(snapshot.favorites_changed(&favorites));

        snapshot.mark_favorites(favorites.clone());

        assert!(!snapshot.favorites_changed(&favorites.clone()));
    }
}
