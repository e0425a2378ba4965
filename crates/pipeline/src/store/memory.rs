use std::collections::HashMap;

use chrono::Utc;
use contextdoc_core::{GenerationRecord, GenerationStatus, RecordKey, RecordPatch, UsageLedger};
use parking_lot::Mutex;

use super::{
    apply_transition, LedgerStore, RecordStore, StoreError, Submission, SubmissionStore,
};

/// Process-local store, used for tests and single-node runs.
#[derive(Default)]
pub struct MemoryStore {
    records: Mutex<HashMap<RecordKey, GenerationRecord>>,
    ledgers: Mutex<HashMap<String, UsageLedger>>,
    submissions: Mutex<HashMap<RecordKey, Submission>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn upsert_ledger(&self, ledger: UsageLedger) {
        self.ledgers.lock().insert(ledger.user_id.clone(), ledger);
    }
}

impl RecordStore for MemoryStore {
    fn get(&self, key: &RecordKey) -> Result<Option<GenerationRecord>, StoreError> {
        Ok(self.records.lock().get(key).cloned())
    }

    fn create_if_absent(&self, record: GenerationRecord) -> Result<GenerationRecord, StoreError> {
        let mut records = self.records.lock();
        Ok(records
            .entry(record.key.clone())
            .or_insert(record)
            .clone())
    }

    fn set(&self, record: &GenerationRecord) -> Result<(), StoreError> {
        self.records
            .lock()
            .insert(record.key.clone(), record.clone());
        Ok(())
    }

    fn merge(&self, key: &RecordKey, patch: RecordPatch) -> Result<GenerationRecord, StoreError> {
        let mut records = self.records.lock();
        let record = records
            .get_mut(key)
            .ok_or_else(|| StoreError::NotFound(key.to_string()))?;
        record.apply(patch, Utc::now());
        Ok(record.clone())
    }

    fn compare_and_set_status(
        &self,
        key: &RecordKey,
        expected: GenerationStatus,
        next: GenerationStatus,
        patch: RecordPatch,
    ) -> Result<Option<GenerationRecord>, StoreError> {
        let mut records = self.records.lock();
        let record = records
            .get_mut(key)
            .ok_or_else(|| StoreError::NotFound(key.to_string()))?;
        let mut candidate = record.clone();
        if !apply_transition(&mut candidate, expected, next, patch)? {
            return Ok(None);
        }
        *record = candidate.clone();
        Ok(Some(candidate))
    }
}

impl LedgerStore for MemoryStore {
    fn load(&self, user_id: &str) -> Result<Option<UsageLedger>, StoreError> {
        Ok(self.ledgers.lock().get(user_id).cloned())
    }

    fn increment(
        &self,
        user_id: &str,
        tokens: u64,
        documents: u32,
    ) -> Result<UsageLedger, StoreError> {
        let mut ledgers = self.ledgers.lock();
        let ledger = ledgers
            .get_mut(user_id)
            .ok_or_else(|| StoreError::NotFound(format!("usage ledger {user_id}")))?;
        ledger.token_count = ledger.token_count.saturating_add(tokens);
        ledger.documents_generated = ledger.documents_generated.saturating_add(documents);
        Ok(ledger.clone())
    }
}

impl SubmissionStore for MemoryStore {
    fn save_submission(&self, key: &RecordKey, submission: &Submission) -> Result<(), StoreError> {
        self.submissions
            .lock()
            .insert(key.clone(), submission.clone());
        Ok(())
    }

    fn load_submission(&self, key: &RecordKey) -> Result<Option<Submission>, StoreError> {
        Ok(self.submissions.lock().get(key).cloned())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::thread;

    use super::*;
    use crate::store::tests::{
        exercise_ledger_store, exercise_record_store, exercise_submission_store, sample_ledger,
    };

    #[test]
    fn record_store_contract() {
        exercise_record_store(&MemoryStore::new());
    }

    #[test]
    fn ledger_store_contract() {
        let store = MemoryStore::new();
        store.upsert_ledger(sample_ledger("user-1"));
        exercise_ledger_store(&store);
    }

    #[test]
    fn submission_store_contract() {
        exercise_submission_store(&MemoryStore::new());
    }

    #[test]
    fn concurrent_increments_are_not_lost() {
        let store = Arc::new(MemoryStore::new());
        store.upsert_ledger(sample_ledger("user-1"));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let store = store.clone();
                thread::spawn(move || {
                    for _ in 0..50 {
                        store.increment("user-1", 10, 1).unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        let ledger = store.load("user-1").unwrap().unwrap();
        assert_eq!(ledger.token_count, 100 + 8 * 50 * 10);
        assert_eq!(ledger.documents_generated, 1 + 8 * 50);
    }
}
