// src/records/store.rs

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::NaiveDate;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::model::{DiagnosisCount, MedicalRecord, RecordQuery, RecordStats, COMMON_DIAGNOSES_LIMIT};
use crate::db::StoreError;

/// Persistence for medical records. `update` only succeeds while the stored
/// row still has the `version` the caller read, and reports
/// [`StoreError::Stale`] otherwise.
#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn get(&self, id: Uuid) -> Result<Option<MedicalRecord>, StoreError>;

    /// Newest first, one page plus the total match count.
    async fn list(&self, query: &RecordQuery) -> Result<(Vec<MedicalRecord>, u64), StoreError>;

    async fn for_patient(&self, patient_id: Uuid) -> Result<Vec<MedicalRecord>, StoreError>;

    /// Records needing a follow-up dated within `[from, to]`, soonest first.
    async fn follow_ups(&self, from: NaiveDate, to: NaiveDate) -> Result<Vec<MedicalRecord>, StoreError>;

    async fn insert(&self, record: MedicalRecord) -> Result<MedicalRecord, StoreError>;

    /// Returns the record as stored, carrying its new version.
    async fn update(&self, record: MedicalRecord) -> Result<MedicalRecord, StoreError>;

    async fn delete(&self, id: Uuid) -> Result<(), StoreError>;

    async fn stats(&self) -> Result<RecordStats, StoreError>;
}

#[derive(Default)]
pub struct MemoryRecordStore {
    rows: RwLock<HashMap<Uuid, MedicalRecord>>,
}

impl MemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn newest_first(items: &mut [MedicalRecord]) {
    items.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| a.id.cmp(&b.id)));
}

#[async_trait]
impl RecordStore for MemoryRecordStore {
    async fn get(&self, id: Uuid) -> Result<Option<MedicalRecord>, StoreError> {
        Ok(self.rows.read().await.get(&id).cloned())
    }

    async fn list(&self, query: &RecordQuery) -> Result<(Vec<MedicalRecord>, u64), StoreError> {
        let rows = self.rows.read().await;
        let mut matched: Vec<MedicalRecord> = rows.values().filter(|r| query.matches(r)).cloned().collect();
        let total = matched.len() as u64;
        newest_first(&mut matched);
        let page = matched
            .into_iter()
            .skip(query.offset() as usize)
            .take(query.limit as usize)
            .collect();
        Ok((page, total))
    }

    async fn for_patient(&self, patient_id: Uuid) -> Result<Vec<MedicalRecord>, StoreError> {
        let rows = self.rows.read().await;
        let mut items: Vec<MedicalRecord> = rows.values().filter(|r| r.patient_id == patient_id).cloned().collect();
        newest_first(&mut items);
        Ok(items)
    }

    async fn follow_ups(&self, from: NaiveDate, to: NaiveDate) -> Result<Vec<MedicalRecord>, StoreError> {
        let rows = self.rows.read().await;
        let mut items: Vec<MedicalRecord> = rows
            .values()
            .filter(|r| r.follow_up_required && r.follow_up_date.is_some_and(|d| (from..=to).contains(&d)))
            .cloned()
            .collect();
        items.sort_by_key(|r| (r.follow_up_date, r.id));
        Ok(items)
    }

    async fn insert(&self, record: MedicalRecord) -> Result<MedicalRecord, StoreError> {
        self.rows.write().await.insert(record.id, record.clone());
        Ok(record)
    }

    async fn update(&self, record: MedicalRecord) -> Result<MedicalRecord, StoreError> {
        let mut rows = self.rows.write().await;
        let row = rows.get_mut(&record.id).ok_or(StoreError::NotFound)?;
        if row.version != record.version {
            return Err(StoreError::Stale);
        }
        let mut saved = record;
        saved.version += 1;
        *row = saved.clone();
        Ok(saved)
    }

    async fn delete(&self, id: Uuid) -> Result<(), StoreError> {
        self.rows
            .write()
            .await
            .remove(&id)
            .map(|_| ())
            .ok_or(StoreError::NotFound)
    }

    async fn stats(&self) -> Result<RecordStats, StoreError> {
        let rows = self.rows.read().await;
        let total = rows.len() as u64;
        let with_follow_up = rows.values().filter(|r| r.follow_up_required).count() as u64;

        let mut counts: HashMap<&str, u64> = HashMap::new();
        for r in rows.values() {
            *counts.entry(r.diagnosis.as_str()).or_default() += 1;
        }
        let mut common: Vec<DiagnosisCount> = counts
            .into_iter()
            .map(|(diagnosis, count)| DiagnosisCount {
                diagnosis: diagnosis.to_string(),
                count,
            })
            .collect();
        common.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.diagnosis.cmp(&b.diagnosis)));
        common.truncate(COMMON_DIAGNOSES_LIMIT);

        Ok(RecordStats::new(total, with_follow_up, common))
    }
}
