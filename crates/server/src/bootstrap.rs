use std::sync::Arc;

use clientdesk_agent::runtime::{AgentRuntime, RuntimeSettings};
use clientdesk_core::config::{AppConfig, ConfigError, LoadOptions};
use clientdesk_core::registry::{ModuleRegistry, RegistryError};
use thiserror::Error;
use tracing::info;

use crate::llm::HttpLlmClient;
use crate::zoho::{ClientBuildError, ZohoClient};

pub struct Application {
    pub config: AppConfig,
    pub registry: Arc<ModuleRegistry>,
    pub crm: ZohoClient,
    pub runtime: Arc<AgentRuntime>,
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("module registry failed to load: {0}")]
    Registry(#[from] RegistryError),
    #[error("crm client could not be built: {0}")]
    CrmClient(#[source] ClientBuildError),
    #[error("text generation client could not be built: {0}")]
    LlmClient(String),
}

pub async fn bootstrap(options: LoadOptions) -> Result<Application, BootstrapError> {
    info!(event_name = "system.bootstrap.start", correlation_id = "bootstrap", "starting application bootstrap");
    let config = AppConfig::load(options)?;
    bootstrap_with_config(config).await
}

/// Builds the application from an already loaded configuration. No remote
/// call is made here; the first token exchange happens on first use.
pub async fn bootstrap_with_config(config: AppConfig) -> Result<Application, BootstrapError> {
    let registry = Arc::new(load_registry(&config)?);
    info!(
        event_name = "system.bootstrap.registry_loaded",
        correlation_id = "bootstrap",
        modules = registry.len(),
        source = if config.crm.modules_path.is_some() { "file" } else { "builtin" },
        "module registry loaded"
    );

    let crm = ZohoClient::new(&config.crm).map_err(BootstrapError::CrmClient)?;
    let llm = HttpLlmClient::new(&config.llm).map_err(|error| BootstrapError::LlmClient(format!("{error:#}")))?;
    info!(
        event_name = "system.bootstrap.clients_ready",
        correlation_id = "bootstrap",
        llm_provider = ?config.llm.provider,
        llm_model = %config.llm.model,
        "crm and text generation clients ready"
    );

    let runtime = Arc::new(AgentRuntime::new(
        Arc::new(crm.clone()),
        registry.clone(),
        Arc::new(llm),
        RuntimeSettings::from(&config),
    ));

    Ok(Application { config, registry, crm, runtime })
}

pub fn load_registry(config: &AppConfig) -> Result<ModuleRegistry, RegistryError> {
    match &config.crm.modules_path {
        Some(path) => ModuleRegistry::load(path),
        None => ModuleRegistry::builtin(),
    }
}
