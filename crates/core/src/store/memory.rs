//! In-process `RemoteStore` that keeps rows in memory and records every call.
//! Used by tests across the workspace and by offline demos.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use super::{RemoteStore, SearchQuery, StoreError};
use crate::domain::record::{display_value, Fields};

#[derive(Clone, Debug, PartialEq)]
pub enum StoreCall {
    GetRecord { module: String, id: String },
    GetUser { id: String },
    GetRelated { module: String, id: String, list: String, per_page: u32 },
    Search { module: String, query: SearchQuery },
    Create { module: String, data: Fields },
    Update { module: String, id: String, data: Fields },
}

impl StoreCall {
    pub fn is_write(&self) -> bool {
        matches!(self, Self::Create { .. } | Self::Update { .. })
    }
}

#[derive(Clone, Debug)]
enum RelatedBehavior {
    Rows { rows: Vec<Fields>, delay: Option<Duration> },
    Fail(StoreError),
}

type RecordKey = (String, String);
type RelatedKey = (String, String, String);

#[derive(Debug, Default)]
pub struct InMemoryStore {
    records: Mutex<HashMap<RecordKey, Fields>>,
    related: Mutex<HashMap<RelatedKey, RelatedBehavior>>,
    primary_failures: Mutex<HashMap<RecordKey, StoreError>>,
    write_failure: Mutex<Option<StoreError>>,
    calls: Mutex<Vec<StoreCall>>,
    next_id: AtomicU64,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self { next_id: AtomicU64::new(5_000_000_000_001), ..Self::default() }
    }

    /// Adds a row; `fields["id"]` must be set.
    pub fn with_record(self, module: &str, fields: Value) -> Self {
        let fields = fields.as_object().cloned().unwrap_or_default();
        let id = fields.get("id").and_then(Value::as_str).unwrap_or_default().to_string();
        lock(&self.records).insert((module.to_string(), id), fields);
        self
    }

    pub fn with_related(self, module: &str, id: &str, list: &str, rows: Vec<Value>) -> Self {
        let rows = rows.into_iter().filter_map(|row| row.as_object().cloned()).collect();
        lock(&self.related).insert(
            (module.to_string(), id.to_string(), list.to_string()),
            RelatedBehavior::Rows { rows, delay: None },
        );
        self
    }

    pub fn with_slow_related(
        self,
        module: &str,
        id: &str,
        list: &str,
        delay: Duration,
        rows: Vec<Value>,
    ) -> Self {
        let rows = rows.into_iter().filter_map(|row| row.as_object().cloned()).collect();
        lock(&self.related).insert(
            (module.to_string(), id.to_string(), list.to_string()),
            RelatedBehavior::Rows { rows, delay: Some(delay) },
        );
        self
    }

    pub fn with_failing_related(self, module: &str, id: &str, list: &str, error: StoreError) -> Self {
        lock(&self.related)
            .insert((module.to_string(), id.to_string(), list.to_string()), RelatedBehavior::Fail(error));
        self
    }

    pub fn with_primary_failure(self, module: &str, id: &str, error: StoreError) -> Self {
        lock(&self.primary_failures).insert((module.to_string(), id.to_string()), error);
        self
    }

    pub fn with_write_failure(self, error: StoreError) -> Self {
        *lock(&self.write_failure) = Some(error);
        self
    }

    pub fn calls(&self) -> Vec<StoreCall> {
        lock(&self.calls).clone()
    }

    pub fn write_calls(&self) -> Vec<StoreCall> {
        self.calls().into_iter().filter(StoreCall::is_write).collect()
    }

    pub fn search_calls(&self) -> Vec<StoreCall> {
        self.calls().into_iter().filter(|call| matches!(call, StoreCall::Search { .. })).collect()
    }

    pub fn related_calls(&self) -> Vec<StoreCall> {
        self.calls()
            .into_iter()
            .filter(|call| matches!(call, StoreCall::GetRelated { .. }))
            .collect()
    }

    pub fn stored(&self, module: &str, id: &str) -> Option<Fields> {
        lock(&self.records).get(&(module.to_string(), id.to_string())).cloned()
    }

    fn log(&self, call: StoreCall) {
        lock(&self.calls).push(call);
    }

    fn primary(&self, module: &str, id: &str) -> Result<Fields, StoreError> {
        let key = (module.to_string(), id.to_string());
        if let Some(error) = lock(&self.primary_failures).get(&key) {
            return Err(error.clone());
        }
        lock(&self.records).get(&key).cloned().ok_or(StoreError::NotFound)
    }

    fn pending_write_failure(&self) -> Option<StoreError> {
        lock(&self.write_failure).clone()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Every word of the query must appear in some field of the row.
fn matches_word(row: &Fields, word: &str) -> bool {
    let values = row.values().filter_map(display_value).map(|v| v.to_ascii_lowercase()).collect::<Vec<_>>();
    let mut words = word.split_whitespace().map(str::to_ascii_lowercase).peekable();
    if words.peek().is_none() {
        return false;
    }
    words.all(|needle| values.iter().any(|value| value.contains(&needle)))
}

#[async_trait]
impl RemoteStore for InMemoryStore {
    async fn get_record(&self, module: &str, id: &str) -> Result<Fields, StoreError> {
        self.log(StoreCall::GetRecord { module: module.to_string(), id: id.to_string() });
        self.primary(module, id)
    }

    async fn get_user(&self, id: &str) -> Result<Fields, StoreError> {
        self.log(StoreCall::GetUser { id: id.to_string() });
        self.primary("users", id)
    }

    async fn get_related(
        &self,
        module: &str,
        id: &str,
        list: &str,
        per_page: u32,
    ) -> Result<Vec<Fields>, StoreError> {
        self.log(StoreCall::GetRelated {
            module: module.to_string(),
            id: id.to_string(),
            list: list.to_string(),
            per_page,
        });

        let behavior = lock(&self.related)
            .get(&(module.to_string(), id.to_string(), list.to_string()))
            .cloned();
        match behavior {
            None => Err(StoreError::NoContent),
            Some(RelatedBehavior::Fail(error)) => Err(error),
            Some(RelatedBehavior::Rows { rows, delay }) => {
                if let Some(delay) = delay {
                    tokio::time::sleep(delay).await;
                }
                Ok(rows.into_iter().take(per_page as usize).collect())
            }
        }
    }

    async fn search(
        &self,
        module: &str,
        query: &SearchQuery,
        per_page: u32,
    ) -> Result<Vec<Fields>, StoreError> {
        self.log(StoreCall::Search { module: module.to_string(), query: query.clone() });

        let records = lock(&self.records);
        let mut rows = records
            .iter()
            .filter(|((row_module, _), _)| row_module.eq_ignore_ascii_case(module))
            .filter(|(_, row)| match query {
                SearchQuery::Criteria(criteria) => criteria.matches(row),
                SearchQuery::Word(word) => matches_word(row, word),
            })
            .map(|((_, id), row)| (id.clone(), row.clone()))
            .collect::<Vec<_>>();
        rows.sort_by(|left, right| left.0.cmp(&right.0));
        Ok(rows.into_iter().map(|(_, row)| row).take(per_page as usize).collect())
    }

    async fn create(&self, module: &str, data: &Fields) -> Result<Fields, StoreError> {
        self.log(StoreCall::Create { module: module.to_string(), data: data.clone() });
        if let Some(error) = self.pending_write_failure() {
            return Err(error);
        }

        let id = self.next_id.fetch_add(1, Ordering::SeqCst).to_string();
        let mut row = data.clone();
        row.insert("id".to_string(), Value::String(id.clone()));
        lock(&self.records).insert((module.to_string(), id), row.clone());
        Ok(row)
    }

    async fn update(&self, module: &str, id: &str, data: &Fields) -> Result<Fields, StoreError> {
        self.log(StoreCall::Update {
            module: module.to_string(),
            id: id.to_string(),
            data: data.clone(),
        });
        if let Some(error) = self.pending_write_failure() {
            return Err(error);
        }

        let mut records = lock(&self.records);
        let row = records.get_mut(&(module.to_string(), id.to_string())).ok_or(StoreError::NotFound)?;
        for (key, value) in data {
            row.insert(key.clone(), value.clone());
        }
        Ok(row.clone())
    }
}
