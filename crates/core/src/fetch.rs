//! Composite record fetch: one primary read, then a bounded concurrent
//! fan-out over related lists where each list may fail on its own.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, warn};

use crate::config::FetchConfig;
use crate::domain::module::ModuleDescriptor;
use crate::domain::record::{FetchReport, Fields, Record, SkipReason, SkippedList};
use crate::errors::ApplicationError;
use crate::registry::ModuleRegistry;
use crate::store::{RemoteStore, StoreError};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FetchSettings {
    pub max_concurrency: usize,
    pub related_timeout: Duration,
    pub related_per_page: u32,
    pub read_retries: u32,
}

impl Default for FetchSettings {
    fn default() -> Self {
        Self {
            max_concurrency: 8,
            related_timeout: Duration::from_secs(5),
            related_per_page: 10,
            read_retries: 1,
        }
    }
}

impl From<&FetchConfig> for FetchSettings {
    fn from(config: &FetchConfig) -> Self {
        Self {
            max_concurrency: config.max_concurrency,
            related_timeout: Duration::from_secs(config.related_timeout_secs),
            related_per_page: config.related_per_page,
            read_retries: config.read_retries,
        }
    }
}

enum RelatedOutcome {
    Rows(Vec<Fields>),
    Skipped(SkipReason),
}

#[derive(Clone)]
pub struct RecordFetcher {
    store: Arc<dyn RemoteStore>,
    registry: Arc<ModuleRegistry>,
    settings: FetchSettings,
}

impl RecordFetcher {
    pub fn new(store: Arc<dyn RemoteStore>, registry: Arc<ModuleRegistry>, settings: FetchSettings) -> Self {
        Self { store, registry, settings }
    }

    pub fn registry(&self) -> &ModuleRegistry {
        &self.registry
    }

    pub async fn fetch(
        &self,
        slug: &str,
        record_id: &str,
        related_override: Option<&[String]>,
    ) -> Result<(Record, FetchReport), ApplicationError> {
        let descriptor = self
            .registry
            .resolve(slug)
            .ok_or_else(|| ApplicationError::UnknownModule { slug: slug.to_string() })?;

        let fields = self.fetch_primary(descriptor, record_id).await?;
        let mut record = Record::from_fields(fields);
        if record.id.is_empty() {
            record.id = record_id.to_string();
        }
        let mut report = FetchReport::new(&descriptor.remote_module, &record.id);

        let lists = related_lists(descriptor, related_override);
        if lists.is_empty() {
            return Ok((record, report));
        }

        let permits = Arc::new(Semaphore::new(self.settings.max_concurrency.max(1)));
        let mut tasks = JoinSet::new();
        let mut pending = HashMap::with_capacity(lists.len());
        for list in lists {
            let store = Arc::clone(&self.store);
            let permits = Arc::clone(&permits);
            let module = descriptor.remote_module.clone();
            let id = record.id.clone();
            let timeout = self.settings.related_timeout;
            let per_page = self.settings.related_per_page;

            let name = list.clone();
            let handle = tasks.spawn(async move {
                let Ok(_permit) = permits.acquire_owned().await else {
                    return (list, RelatedOutcome::Skipped(SkipReason::Failed("pool closed".into())));
                };
                let outcome =
                    match tokio::time::timeout(timeout, store.get_related(&module, &id, &list, per_page))
                        .await
                    {
                        Err(_) => RelatedOutcome::Skipped(SkipReason::TimedOut),
                        Ok(Ok(rows)) if rows.is_empty() => RelatedOutcome::Skipped(SkipReason::Empty),
                        Ok(Ok(rows)) => RelatedOutcome::Rows(rows),
                        Ok(Err(StoreError::NoContent | StoreError::NotFound)) => {
                            RelatedOutcome::Skipped(SkipReason::Empty)
                        }
                        Ok(Err(error)) => RelatedOutcome::Skipped(SkipReason::Failed(error.to_string())),
                    };
                (list, outcome)
            });
            pending.insert(handle.id(), name);
        }

        while let Some(joined) = tasks.join_next_with_id().await {
            let (list, outcome) = match joined {
                Ok((_, result)) => result,
                Err(error) => {
                    let list = pending.remove(&error.id()).unwrap_or_default();
                    warn!(
                        event_name = "orchestrator.fetch.related_task_failed",
                        module = %descriptor.remote_module,
                        record_id = %record.id,
                        list = %list,
                        error = %error,
                        "related list task did not complete"
                    );
                    (list, RelatedOutcome::Skipped(SkipReason::Failed(format!("task aborted: {error}"))))
                }
            };

            match outcome {
                RelatedOutcome::Rows(rows) => {
                    debug!(
                        event_name = "orchestrator.fetch.related_loaded",
                        module = %descriptor.remote_module,
                        list = %list,
                        count = rows.len(),
                        "related list loaded"
                    );
                    record.related.insert(list.clone(), rows.into_iter().map(Record::from_fields).collect());
                    report.fetched.push(list);
                }
                RelatedOutcome::Skipped(reason) => {
                    if reason != SkipReason::Empty {
                        warn!(
                            event_name = "orchestrator.fetch.related_skipped",
                            module = %descriptor.remote_module,
                            record_id = %record.id,
                            list = %list,
                            reason = ?reason,
                            "related list skipped"
                        );
                    }
                    report.skipped.push(SkippedList { list, reason });
                }
            }
        }

        report.fetched.sort();
        report.skipped.sort_by(|left, right| left.list.cmp(&right.list));
        Ok((record, report))
    }

    async fn fetch_primary(
        &self,
        descriptor: &ModuleDescriptor,
        record_id: &str,
    ) -> Result<Fields, ApplicationError> {
        let record_id = record_id.trim();
        if record_id.is_empty() {
            return Err(ApplicationError::NotFound {
                module: descriptor.remote_module.clone(),
                record_id: String::new(),
            });
        }

        let mut attempt = 0;
        loop {
            let result = if descriptor.directory {
                self.store.get_user(record_id).await
            } else {
                self.store.get_record(&descriptor.remote_module, record_id).await
            };

            match result {
                Ok(fields) if fields.is_empty() => {
                    return Err(ApplicationError::NotFound {
                        module: descriptor.remote_module.clone(),
                        record_id: record_id.to_string(),
                    });
                }
                Ok(fields) => return Ok(fields),
                Err(StoreError::NotFound | StoreError::NoContent) => {
                    return Err(ApplicationError::NotFound {
                        module: descriptor.remote_module.clone(),
                        record_id: record_id.to_string(),
                    });
                }
                Err(error) if error.is_retryable() && attempt < self.settings.read_retries => {
                    attempt += 1;
                    warn!(
                        event_name = "orchestrator.fetch.primary_retry",
                        module = %descriptor.remote_module,
                        record_id,
                        attempt,
                        error = %error,
                        "retrying primary record fetch"
                    );
                }
                Err(error) => return Err(error.into_upstream()),
            }
        }
    }
}

fn related_lists(descriptor: &ModuleDescriptor, related_override: Option<&[String]>) -> Vec<String> {
    let requested = related_override.unwrap_or(&descriptor.default_related);
    let mut lists: Vec<String> = Vec::with_capacity(requested.len());
    for list in requested {
        let list = list.trim();
        if !list.is_empty() && !lists.iter().any(|existing| existing == list) {
            lists.push(list.to_string());
        }
    }
    lists
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use async_trait::async_trait;
    use serde_json::json;

    use super::{FetchSettings, RecordFetcher};
    use crate::domain::record::{Fields, SkipReason};
    use crate::errors::ApplicationError;
    use crate::registry::ModuleRegistry;
    use crate::store::memory::{InMemoryStore, StoreCall};
    use crate::store::{RemoteStore, SearchQuery, StoreError};

    /// Delegates to an in-memory store but panics while loading one list.
    struct PanicsOnList {
        inner: InMemoryStore,
        list: &'static str,
    }

    #[async_trait]
    impl RemoteStore for PanicsOnList {
        async fn get_record(&self, module: &str, id: &str) -> Result<Fields, StoreError> {
            self.inner.get_record(module, id).await
        }

        async fn get_user(&self, id: &str) -> Result<Fields, StoreError> {
            self.inner.get_user(id).await
        }

        async fn get_related(
            &self,
            module: &str,
            id: &str,
            list: &str,
            per_page: u32,
        ) -> Result<Vec<Fields>, StoreError> {
            if list == self.list {
                panic!("related list handler crashed");
            }
            self.inner.get_related(module, id, list, per_page).await
        }

        async fn search(&self, module: &str, query: &SearchQuery, per_page: u32) -> Result<Vec<Fields>, StoreError> {
            self.inner.search(module, query, per_page).await
        }

        async fn create(&self, module: &str, data: &Fields) -> Result<Fields, StoreError> {
            self.inner.create(module, data).await
        }

        async fn update(&self, module: &str, id: &str, data: &Fields) -> Result<Fields, StoreError> {
            self.inner.update(module, id, data).await
        }
    }

    fn fetcher(store: Arc<InMemoryStore>) -> RecordFetcher {
        let registry = Arc::new(ModuleRegistry::builtin().expect("builtin registry"));
        RecordFetcher::new(
            store,
            registry,
            FetchSettings { related_timeout: Duration::from_millis(200), ..FetchSettings::default() },
        )
    }

    fn deal_store() -> InMemoryStore {
        InMemoryStore::new().with_record(
            "Deals",
            json!({"id": "4000000000100", "Deal_Name": "Renewal", "Stage": "Qualification"}),
        )
    }

    #[tokio::test]
    async fn primary_failure_issues_no_related_requests() {
        let store = Arc::new(deal_store().with_primary_failure(
            "Deals",
            "4000000000100",
            StoreError::Status { status: 400, body: "bad".into() },
        ));
        let result = fetcher(store.clone()).fetch("deals", "4000000000100", None).await;

        assert!(matches!(result, Err(ApplicationError::Upstream { .. })));
        assert!(store.related_calls().is_empty());
    }

    #[tokio::test]
    async fn missing_primary_is_not_found() {
        let store = Arc::new(deal_store());
        let result = fetcher(store.clone()).fetch("deals", "4000000000999", None).await;

        assert!(matches!(
            result,
            Err(ApplicationError::NotFound { ref module, ref record_id })
                if module == "Deals" && record_id == "4000000000999"
        ));
        assert!(store.related_calls().is_empty());
    }

    #[tokio::test]
    async fn timed_out_list_does_not_drop_sibling_data() {
        let store = Arc::new(
            deal_store()
                .with_related("Deals", "4000000000100", "Notes", vec![json!({"id": "1", "Note_Title": "Call back"})])
                .with_slow_related(
                    "Deals",
                    "4000000000100",
                    "Quotes",
                    Duration::from_secs(5),
                    vec![json!({"id": "2"})],
                ),
        );
        let lists = vec!["Notes".to_string(), "Quotes".to_string()];
        let (record, report) = fetcher(store)
            .fetch("deals", "4000000000100", Some(&lists))
            .await
            .expect("fetch should tolerate the slow list");

        assert_eq!(record.related.get("Notes").map(Vec::len), Some(1));
        assert!(!record.related.contains_key("Quotes"));
        assert_eq!(report.fetched, vec!["Notes".to_string()]);
        assert_eq!(report.skip_reason("Quotes"), Some(&SkipReason::TimedOut));
        assert!(report.is_partial());
    }

    #[tokio::test]
    async fn empty_and_failed_lists_are_omitted_but_reported_differently() {
        let store = Arc::new(deal_store().with_failing_related(
            "Deals",
            "4000000000100",
            "Products",
            StoreError::Status { status: 500, body: "boom".into() },
        ));
        let lists = vec!["Products".to_string(), "Stage_History".to_string()];
        let (record, report) =
            fetcher(store).fetch("deals", "4000000000100", Some(&lists)).await.expect("fetch");

        assert!(record.related.is_empty());
        assert_eq!(report.skip_reason("Stage_History"), Some(&SkipReason::Empty));
        assert!(matches!(report.skip_reason("Products"), Some(SkipReason::Failed(_))));
    }

    #[tokio::test]
    async fn crashed_list_task_is_reported_as_failed() {
        let store = Arc::new(PanicsOnList {
            inner: deal_store().with_related(
                "Deals",
                "4000000000100",
                "Notes",
                vec![json!({"id": "1", "Note_Title": "Call back"})],
            ),
            list: "Quotes",
        });
        let registry = Arc::new(ModuleRegistry::builtin().expect("builtin registry"));
        let lists = vec!["Notes".to_string(), "Quotes".to_string()];
        let (record, report) = RecordFetcher::new(store, registry, FetchSettings::default())
            .fetch("deals", "4000000000100", Some(&lists))
            .await
            .expect("a crashed list is not fatal");

        assert_eq!(record.related.get("Notes").map(Vec::len), Some(1));
        assert_eq!(report.fetched, vec!["Notes".to_string()]);
        assert!(matches!(report.skip_reason("Quotes"), Some(SkipReason::Failed(_))));
    }

    #[tokio::test]
    async fn default_related_lists_are_used_without_override() {
        let store = Arc::new(deal_store());
        let (_, report) = fetcher(store.clone()).fetch("deals", "4000000000100", None).await.expect("fetch");

        let registry = ModuleRegistry::builtin().expect("registry");
        let expected = registry.resolve("deals").map(|d| d.default_related.len()).unwrap_or(0);
        assert_eq!(store.related_calls().len(), expected);
        assert_eq!(report.skipped.len(), expected);
    }

    #[tokio::test]
    async fn user_directory_uses_its_own_endpoint() {
        let store = Arc::new(
            InMemoryStore::new().with_record("users", json!({"id": "77", "full_name": "Ada Advisor"})),
        );
        let (record, _) = fetcher(store.clone()).fetch("users", "77", None).await.expect("fetch user");

        assert_eq!(record.text("full_name").as_deref(), Some("Ada Advisor"));
        assert_eq!(store.calls().first(), Some(&StoreCall::GetUser { id: "77".to_string() }));
    }

    #[tokio::test]
    async fn unknown_slug_is_rejected_before_any_call() {
        let store = Arc::new(InMemoryStore::new());
        let result = fetcher(store.clone()).fetch("widgets", "1", None).await;

        assert!(matches!(result, Err(ApplicationError::UnknownModule { .. })));
        assert!(store.calls().is_empty());
    }
}
