use std::sync::Arc;

use clientdesk_core::config::AppConfig;
use clientdesk_core::domain::module::ModuleDescriptor;
use clientdesk_core::errors::ApplicationError;
use clientdesk_core::fetch::{FetchSettings, RecordFetcher};
use clientdesk_core::lookup::LookupResolver;
use clientdesk_core::registry::ModuleRegistry;
use clientdesk_core::store::RemoteStore;
use futures::StreamExt;
use tracing::info;

use crate::actions::ActionHandler;
use crate::conversation::{ChatRequest, ChatResponse};
use crate::describe::describe_record;
use crate::executor::{PlanExecutor, TurnContext};
use crate::guardrails::GuardrailPolicy;
use crate::llm::{text_generation_error, LlmClient, TextStream};
use crate::planner::Planner;
use crate::prompts::{answer_prompt, scan_prompt};
use crate::related::RelatedSelector;
use crate::scan::{parse_recommendations, ScanRequest, ScanResponse};

#[derive(Clone, Debug)]
pub struct RuntimeSettings {
    pub fetch: FetchSettings,
    pub search_per_page: u32,
    pub guardrails: GuardrailPolicy,
    pub select_related: bool,
}

impl Default for RuntimeSettings {
    fn default() -> Self {
        Self {
            fetch: FetchSettings::default(),
            search_per_page: 10,
            guardrails: GuardrailPolicy::default(),
            select_related: false,
        }
    }
}

impl From<&AppConfig> for RuntimeSettings {
    fn from(config: &AppConfig) -> Self {
        Self {
            fetch: FetchSettings::from(&config.fetch),
            search_per_page: config.fetch.search_per_page,
            guardrails: GuardrailPolicy::default(),
            select_related: config.fetch.select_related,
        }
    }
}

/// Entry point for one chat turn: plan, then execute.
#[derive(Clone)]
pub struct AgentRuntime {
    registry: Arc<ModuleRegistry>,
    fetcher: RecordFetcher,
    planner: Planner,
    executor: PlanExecutor,
    llm: Arc<dyn LlmClient>,
    selector: Option<RelatedSelector>,
}

impl AgentRuntime {
    pub fn new(
        store: Arc<dyn RemoteStore>,
        registry: Arc<ModuleRegistry>,
        llm: Arc<dyn LlmClient>,
        settings: RuntimeSettings,
    ) -> Self {
        let fetcher = RecordFetcher::new(store.clone(), registry.clone(), settings.fetch);
        let resolver = LookupResolver::new(store.clone(), registry.clone(), settings.search_per_page);
        let actions = ActionHandler::new(store.clone(), registry.clone(), resolver, settings.guardrails);
        let executor = PlanExecutor::new(
            store,
            registry.clone(),
            fetcher.clone(),
            actions,
            llm.clone(),
            settings.search_per_page,
        );
        let planner = Planner::new(llm.clone(), registry.clone());
        let selector = settings.select_related.then(|| RelatedSelector::new(llm.clone()));

        Self { registry, fetcher, planner, executor, llm, selector }
    }

    pub fn registry(&self) -> &ModuleRegistry {
        &self.registry
    }

    pub async fn handle(&self, request: &ChatRequest) -> Result<ChatResponse, ApplicationError> {
        let descriptor = self
            .registry
            .resolve(&request.slug)
            .ok_or_else(|| ApplicationError::UnknownModule { slug: request.slug.clone() })?;
        if request.query.trim().is_empty() {
            return Err(ApplicationError::validation(descriptor.remote_module.clone(), "query must not be empty"));
        }

        let related = self.related_lists(descriptor, request).await;
        let plan = self.planner.plan(request).await?;
        info!(
            event_name = "agent.turn.planned",
            module = %descriptor.remote_module,
            steps = plan.steps.len(),
            mutations = plan.steps.iter().filter(|step| step.action.is_mutation()).count(),
            "chat turn planned"
        );

        let turn = TurnContext {
            active_slug: &descriptor.slug,
            active_record_id: request.active_record_id(),
            history: &request.history,
            confirmation: request.confirmation(),
            related: related.as_deref(),
        };
        let response = self.executor.execute(&plan, turn).await?;
        info!(
            event_name = "agent.turn.completed",
            module = %descriptor.remote_module,
            requires_confirmation = response.requires_confirmation,
            "chat turn completed"
        );
        Ok(response)
    }

    /// Direct question answering over the caller's record, streamed as the
    /// model produces it.
    pub async fn answer_stream(&self, request: &ChatRequest) -> Result<TextStream, ApplicationError> {
        let descriptor = self
            .registry
            .resolve(&request.slug)
            .ok_or_else(|| ApplicationError::UnknownModule { slug: request.slug.clone() })?;
        let record_id = request.active_record_id().ok_or_else(|| {
            ApplicationError::validation(descriptor.remote_module.clone(), "a record id is required")
        })?;

        let related = self.related_lists(descriptor, request).await;
        let (record, _) = self.fetcher.fetch(&descriptor.slug, record_id, related.as_deref()).await?;
        let prompt = answer_prompt(descriptor, &describe_record(descriptor, &record), &request.query, &request.history);
        let stream = self.llm.complete_stream(&prompt).await.map_err(text_generation_error)?;
        Ok(stream.map(|chunk| chunk.map_err(|error| error.context("answer stream interrupted"))).boxed())
    }

    /// Lists the caller named win; otherwise the model picks when selection
    /// is enabled, and `None` leaves the module defaults.
    async fn related_lists(&self, descriptor: &ModuleDescriptor, request: &ChatRequest) -> Option<Vec<String>> {
        if request.related.is_some() {
            return request.related.clone();
        }
        self.selector.as_ref()?.select(descriptor, &request.query).await
    }

    /// Reviews one record and returns suggestions; never writes.
    pub async fn scan(&self, request: &ScanRequest) -> Result<ScanResponse, ApplicationError> {
        let descriptor = self
            .registry
            .resolve_any(&request.slug)
            .ok_or_else(|| ApplicationError::UnknownModule { slug: request.slug.clone() })?;
        let record_id = request.record_id.trim();
        if record_id.is_empty() {
            return Err(ApplicationError::validation(descriptor.remote_module.clone(), "a record id is required"));
        }

        let (record, report) = self.fetcher.fetch(&descriptor.slug, record_id, None).await?;
        let prompt = scan_prompt(descriptor, &describe_record(descriptor, &record));
        let reply = self.llm.complete(&prompt).await.map_err(text_generation_error)?;
        let response = parse_recommendations(&reply, descriptor);
        info!(
            event_name = "agent.scan.completed",
            module = %descriptor.remote_module,
            partial = report.is_partial(),
            recommendations = response.recommendations.len(),
            "record scan completed"
        );
        Ok(response)
    }
}
