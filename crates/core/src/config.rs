use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub crm: CrmConfig,
    pub llm: LlmConfig,
    pub fetch: FetchConfig,
    pub server: ServerConfig,
    pub logging: LoggingConfig,
}

#[derive(Clone, Debug)]
pub struct CrmConfig {
    pub api_base_url: String,
    pub auth_url: String,
    pub auth_scheme: String,
    pub client_id: String,
    pub client_secret: SecretString,
    pub refresh_token: SecretString,
    pub request_timeout_secs: u64,
    pub token_refresh_margin_secs: u64,
    pub modules_path: Option<PathBuf>,
}

#[derive(Clone, Debug)]
pub struct LlmConfig {
    pub provider: LlmProvider,
    pub api_key: Option<SecretString>,
    pub base_url: Option<String>,
    pub model: String,
    pub timeout_secs: u64,
    pub max_retries: u32,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FetchConfig {
    pub max_concurrency: usize,
    pub related_timeout_secs: u64,
    pub related_per_page: u32,
    pub search_per_page: u32,
    pub read_retries: u32,
    /// Ask the model which related lists a question needs before fetching.
    pub select_related: bool,
}

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub bind_address: String,
    pub port: u16,
    pub graceful_shutdown_secs: u64,
}

#[derive(Clone, Debug)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LlmProvider {
    Gemini,
    OpenAi,
    Ollama,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Compact,
    Pretty,
    Json,
}

#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    pub log_level: Option<String>,
    pub llm_provider: Option<LlmProvider>,
    pub llm_model: Option<String>,
    pub llm_api_key: Option<String>,
    pub crm_api_base_url: Option<String>,
    pub crm_client_id: Option<String>,
    pub crm_client_secret: Option<String>,
    pub crm_refresh_token: Option<String>,
    pub crm_modules_path: Option<PathBuf>,
    pub server_port: Option<u16>,
}

#[derive(Clone, Debug, Default)]
pub struct LoadOptions {
    pub config_path: Option<PathBuf>,
    pub require_file: bool,
    pub overrides: ConfigOverrides,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config file `{path}`: {source}")]
    ReadFile { path: PathBuf, source: std::io::Error },
    #[error("could not parse config file `{path}`: {source}")]
    ParseFile { path: PathBuf, source: toml::de::Error },
    #[error("required config file was not found: `{0}`")]
    MissingConfigFile(PathBuf),
    #[error("environment variable interpolation failed for `{var}`")]
    MissingEnvInterpolation { var: String },
    #[error("unterminated environment interpolation expression")]
    UnterminatedInterpolation,
    #[error("invalid environment override for `{key}`: `{value}`")]
    InvalidEnvOverride { key: String, value: String },
    #[error("configuration validation failed: {0}")]
    Validation(String),
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            crm: CrmConfig {
                api_base_url: "https://www.zohoapis.com/crm/v2".to_string(),
                auth_url: "https://accounts.zoho.com/oauth/v2/token".to_string(),
                auth_scheme: "Zoho-oauthtoken".to_string(),
                client_id: String::new(),
                client_secret: String::new().into(),
                refresh_token: String::new().into(),
                request_timeout_secs: 30,
                token_refresh_margin_secs: 60,
                modules_path: None,
            },
            llm: LlmConfig {
                provider: LlmProvider::Gemini,
                api_key: None,
                base_url: Some("https://generativelanguage.googleapis.com/v1beta".to_string()),
                model: "gemini-2.5-flash".to_string(),
                timeout_secs: 60,
                max_retries: 2,
            },
            fetch: FetchConfig {
                max_concurrency: 8,
                related_timeout_secs: 5,
                related_per_page: 10,
                search_per_page: 10,
                read_retries: 1,
                select_related: false,
            },
            server: ServerConfig {
                bind_address: "127.0.0.1".to_string(),
                port: 8000,
                graceful_shutdown_secs: 15,
            },
            logging: LoggingConfig { level: "info".to_string(), format: LogFormat::Compact },
        }
    }
}

fn secret_value(value: String) -> SecretString {
    value.into()
}

impl std::str::FromStr for LlmProvider {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "gemini" => Ok(Self::Gemini),
            "openai" | "open_ai" => Ok(Self::OpenAi),
            "ollama" => Ok(Self::Ollama),
            other => Err(ConfigError::Validation(format!(
                "unsupported llm provider `{other}` (expected gemini|openai|ollama)"
            ))),
        }
    }
}

impl std::str::FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "compact" => Ok(Self::Compact),
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(ConfigError::Validation(format!(
                "unsupported log format `{other}` (expected compact|pretty|json)"
            ))),
        }
    }
}

impl AppConfig {
    pub fn load(options: LoadOptions) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        let maybe_path = resolve_config_path(options.config_path.as_deref());

        if let Some(path) = maybe_path {
            let patch = read_patch(&path)?;
            config.apply_patch(patch);
        } else if options.require_file {
            let expected = options.config_path.unwrap_or_else(|| PathBuf::from("clientdesk.toml"));
            return Err(ConfigError::MissingConfigFile(expected));
        }

        config.apply_env_overrides()?;
        config.apply_overrides(options.overrides);
        config.validate()?;

        Ok(config)
    }

    fn apply_patch(&mut self, patch: ConfigPatch) {
        if let Some(crm) = patch.crm {
            if let Some(api_base_url) = crm.api_base_url {
                self.crm.api_base_url = api_base_url;
            }
            if let Some(auth_url) = crm.auth_url {
                self.crm.auth_url = auth_url;
            }
            if let Some(auth_scheme) = crm.auth_scheme {
                self.crm.auth_scheme = auth_scheme;
            }
            if let Some(client_id) = crm.client_id {
                self.crm.client_id = client_id;
            }
            if let Some(client_secret) = crm.client_secret {
                self.crm.client_secret = secret_value(client_secret);
            }
            if let Some(refresh_token) = crm.refresh_token {
                self.crm.refresh_token = secret_value(refresh_token);
            }
            if let Some(request_timeout_secs) = crm.request_timeout_secs {
                self.crm.request_timeout_secs = request_timeout_secs;
            }
            if let Some(token_refresh_margin_secs) = crm.token_refresh_margin_secs {
                self.crm.token_refresh_margin_secs = token_refresh_margin_secs;
            }
            if let Some(modules_path) = crm.modules_path {
                self.crm.modules_path = Some(modules_path);
            }
        }

        if let Some(llm) = patch.llm {
            if let Some(provider) = llm.provider {
                self.llm.provider = provider;
            }
            if let Some(api_key) = llm.api_key {
                self.llm.api_key = Some(secret_value(api_key));
            }
            if let Some(base_url) = llm.base_url {
                self.llm.base_url = Some(base_url);
            }
            if let Some(model) = llm.model {
                self.llm.model = model;
            }
            if let Some(timeout_secs) = llm.timeout_secs {
                self.llm.timeout_secs = timeout_secs;
            }
            if let Some(max_retries) = llm.max_retries {
                self.llm.max_retries = max_retries;
            }
        }

        if let Some(fetch) = patch.fetch {
            if let Some(max_concurrency) = fetch.max_concurrency {
                self.fetch.max_concurrency = max_concurrency;
            }
            if let Some(related_timeout_secs) = fetch.related_timeout_secs {
                self.fetch.related_timeout_secs = related_timeout_secs;
            }
            if let Some(related_per_page) = fetch.related_per_page {
                self.fetch.related_per_page = related_per_page;
            }
            if let Some(search_per_page) = fetch.search_per_page {
                self.fetch.search_per_page = search_per_page;
            }
            if let Some(read_retries) = fetch.read_retries {
                self.fetch.read_retries = read_retries;
            }
            if let Some(select_related) = fetch.select_related {
                self.fetch.select_related = select_related;
            }
        }

        if let Some(server) = patch.server {
            if let Some(bind_address) = server.bind_address {
                self.server.bind_address = bind_address;
            }
            if let Some(port) = server.port {
                self.server.port = port;
            }
            if let Some(graceful_shutdown_secs) = server.graceful_shutdown_secs {
                self.server.graceful_shutdown_secs = graceful_shutdown_secs;
            }
        }

        if let Some(logging) = patch.logging {
            if let Some(level) = logging.level {
                self.logging.level = level;
            }
            if let Some(format) = logging.format {
                self.logging.format = format;
            }
        }
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Some(value) = read_env("CLIENTDESK_CRM_API_BASE_URL") {
            self.crm.api_base_url = value;
        }
        if let Some(value) = read_env("CLIENTDESK_CRM_AUTH_URL") {
            self.crm.auth_url = value;
        }
        if let Some(value) = read_env("CLIENTDESK_CRM_CLIENT_ID") {
            self.crm.client_id = value;
        }
        if let Some(value) = read_env("CLIENTDESK_CRM_CLIENT_SECRET") {
            self.crm.client_secret = secret_value(value);
        }
        if let Some(value) = read_env("CLIENTDESK_CRM_REFRESH_TOKEN") {
            self.crm.refresh_token = secret_value(value);
        }
        if let Some(value) = read_env("CLIENTDESK_CRM_REQUEST_TIMEOUT_SECS") {
            self.crm.request_timeout_secs = parse_u64("CLIENTDESK_CRM_REQUEST_TIMEOUT_SECS", &value)?;
        }
        if let Some(value) = read_env("CLIENTDESK_CRM_MODULES_PATH") {
            self.crm.modules_path = Some(PathBuf::from(value));
        }

        if let Some(value) = read_env("CLIENTDESK_LLM_PROVIDER") {
            self.llm.provider = value.parse()?;
        }
        if let Some(value) = read_env("CLIENTDESK_LLM_API_KEY") {
            self.llm.api_key = Some(secret_value(value));
        }
        if let Some(value) = read_env("CLIENTDESK_LLM_BASE_URL") {
            self.llm.base_url = Some(value);
        }
        if let Some(value) = read_env("CLIENTDESK_LLM_MODEL") {
            self.llm.model = value;
        }
        if let Some(value) = read_env("CLIENTDESK_LLM_TIMEOUT_SECS") {
            self.llm.timeout_secs = parse_u64("CLIENTDESK_LLM_TIMEOUT_SECS", &value)?;
        }
        if let Some(value) = read_env("CLIENTDESK_LLM_MAX_RETRIES") {
            self.llm.max_retries = parse_u32("CLIENTDESK_LLM_MAX_RETRIES", &value)?;
        }

        if let Some(value) = read_env("CLIENTDESK_FETCH_MAX_CONCURRENCY") {
            self.fetch.max_concurrency = parse_u32("CLIENTDESK_FETCH_MAX_CONCURRENCY", &value)? as usize;
        }
        if let Some(value) = read_env("CLIENTDESK_FETCH_RELATED_TIMEOUT_SECS") {
            self.fetch.related_timeout_secs =
                parse_u64("CLIENTDESK_FETCH_RELATED_TIMEOUT_SECS", &value)?;
        }
        if let Some(value) = read_env("CLIENTDESK_FETCH_SELECT_RELATED") {
            self.fetch.select_related = parse_bool("CLIENTDESK_FETCH_SELECT_RELATED", &value)?;
        }

        if let Some(value) = read_env("CLIENTDESK_SERVER_BIND_ADDRESS") {
            self.server.bind_address = value;
        }
        if let Some(value) = read_env("CLIENTDESK_SERVER_PORT") {
            self.server.port = parse_u16("CLIENTDESK_SERVER_PORT", &value)?;
        }

        let log_level =
            read_env("CLIENTDESK_LOGGING_LEVEL").or_else(|| read_env("CLIENTDESK_LOG_LEVEL"));
        if let Some(value) = log_level {
            self.logging.level = value;
        }
        let log_format =
            read_env("CLIENTDESK_LOGGING_FORMAT").or_else(|| read_env("CLIENTDESK_LOG_FORMAT"));
        if let Some(value) = log_format {
            self.logging.format = value.parse()?;
        }

        Ok(())
    }

    fn apply_overrides(&mut self, overrides: ConfigOverrides) {
        if let Some(log_level) = overrides.log_level {
            self.logging.level = log_level;
        }
        if let Some(llm_provider) = overrides.llm_provider {
            self.llm.provider = llm_provider;
        }
        if let Some(llm_model) = overrides.llm_model {
            self.llm.model = llm_model;
        }
        if let Some(llm_api_key) = overrides.llm_api_key {
            self.llm.api_key = Some(secret_value(llm_api_key));
        }
        if let Some(api_base_url) = overrides.crm_api_base_url {
            self.crm.api_base_url = api_base_url;
        }
        if let Some(client_id) = overrides.crm_client_id {
            self.crm.client_id = client_id;
        }
        if let Some(client_secret) = overrides.crm_client_secret {
            self.crm.client_secret = secret_value(client_secret);
        }
        if let Some(refresh_token) = overrides.crm_refresh_token {
            self.crm.refresh_token = secret_value(refresh_token);
        }
        if let Some(modules_path) = overrides.crm_modules_path {
            self.crm.modules_path = Some(modules_path);
        }
        if let Some(port) = overrides.server_port {
            self.server.port = port;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_crm(&self.crm)?;
        validate_llm(&self.llm)?;
        validate_fetch(&self.fetch)?;
        validate_server(&self.server)?;
        validate_logging(&self.logging)?;
        Ok(())
    }
}

fn resolve_config_path(explicit_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit_path {
        return path.exists().then_some(path.to_path_buf());
    }

    [PathBuf::from("clientdesk.toml"), PathBuf::from("config/clientdesk.toml")]
        .into_iter()
        .find(|path| path.exists())
}

fn read_patch(path: &Path) -> Result<ConfigPatch, ConfigError> {
    let raw = fs::read_to_string(path)
        .map_err(|source| ConfigError::ReadFile { path: path.to_path_buf(), source })?;

    let interpolated = interpolate_env_vars(&raw)?;
    toml::from_str::<ConfigPatch>(&interpolated)
        .map_err(|source| ConfigError::ParseFile { path: path.to_path_buf(), source })
}

fn interpolate_env_vars(input: &str) -> Result<String, ConfigError> {
    let mut output = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' && matches!(chars.peek(), Some('{')) {
            chars.next();
            let mut key = String::new();

            loop {
                match chars.next() {
                    Some('}') => break,
                    Some(next) => key.push(next),
                    None => return Err(ConfigError::UnterminatedInterpolation),
                }
            }

            let value = env::var(&key)
                .map_err(|_| ConfigError::MissingEnvInterpolation { var: key.clone() })?;
            output.push_str(&value);
            continue;
        }

        output.push(ch);
    }

    Ok(output)
}

fn is_http_url(value: &str) -> bool {
    value.starts_with("http://") || value.starts_with("https://")
}

fn validate_crm(crm: &CrmConfig) -> Result<(), ConfigError> {
    if !is_http_url(&crm.api_base_url) {
        return Err(ConfigError::Validation(
            "crm.api_base_url must start with http:// or https://".to_string(),
        ));
    }
    if !is_http_url(&crm.auth_url) {
        return Err(ConfigError::Validation(
            "crm.auth_url must start with http:// or https://".to_string(),
        ));
    }
    if crm.client_id.trim().is_empty() {
        return Err(ConfigError::Validation(
            "crm.client_id is required. Create a self client in the Zoho API console".to_string(),
        ));
    }
    if crm.client_secret.expose_secret().trim().is_empty() {
        return Err(ConfigError::Validation("crm.client_secret is required".to_string()));
    }
    if crm.refresh_token.expose_secret().trim().is_empty() {
        return Err(ConfigError::Validation(
            "crm.refresh_token is required. Generate one with the ZohoCRM.modules.ALL scope"
                .to_string(),
        ));
    }
    if crm.request_timeout_secs == 0 || crm.request_timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "crm.request_timeout_secs must be in range 1..=300".to_string(),
        ));
    }
    if crm.auth_scheme.trim().is_empty() {
        return Err(ConfigError::Validation("crm.auth_scheme must not be empty".to_string()));
    }

    Ok(())
}

fn validate_llm(llm: &LlmConfig) -> Result<(), ConfigError> {
    if llm.timeout_secs == 0 || llm.timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "llm.timeout_secs must be in range 1..=300".to_string(),
        ));
    }
    if llm.model.trim().is_empty() {
        return Err(ConfigError::Validation("llm.model must not be empty".to_string()));
    }

    match llm.provider {
        LlmProvider::Gemini | LlmProvider::OpenAi => {
            let missing = llm
                .api_key
                .as_ref()
                .map(|value| value.expose_secret().trim().is_empty())
                .unwrap_or(true);
            if missing {
                return Err(ConfigError::Validation(
                    "llm.api_key is required for gemini/openai providers".to_string(),
                ));
            }
        }
        LlmProvider::Ollama => {
            let missing =
                llm.base_url.as_ref().map(|value| value.trim().is_empty()).unwrap_or(true);
            if missing {
                return Err(ConfigError::Validation(
                    "llm.base_url is required for ollama provider".to_string(),
                ));
            }
        }
    }

    Ok(())
}

fn validate_fetch(fetch: &FetchConfig) -> Result<(), ConfigError> {
    if fetch.max_concurrency == 0 || fetch.max_concurrency > 32 {
        return Err(ConfigError::Validation(
            "fetch.max_concurrency must be in range 1..=32".to_string(),
        ));
    }
    if fetch.related_timeout_secs == 0 || fetch.related_timeout_secs > 30 {
        return Err(ConfigError::Validation(
            "fetch.related_timeout_secs must be in range 1..=30".to_string(),
        ));
    }
    if fetch.related_per_page == 0 || fetch.related_per_page > 200 {
        return Err(ConfigError::Validation(
            "fetch.related_per_page must be in range 1..=200".to_string(),
        ));
    }
    if fetch.search_per_page == 0 || fetch.search_per_page > 200 {
        return Err(ConfigError::Validation(
            "fetch.search_per_page must be in range 1..=200".to_string(),
        ));
    }
    if fetch.read_retries > 5 {
        return Err(ConfigError::Validation("fetch.read_retries must be at most 5".to_string()));
    }

    Ok(())
}

fn validate_server(server: &ServerConfig) -> Result<(), ConfigError> {
    if server.port == 0 {
        return Err(ConfigError::Validation("server.port must be greater than zero".to_string()));
    }

    if server.graceful_shutdown_secs == 0 {
        return Err(ConfigError::Validation(
            "server.graceful_shutdown_secs must be greater than zero".to_string(),
        ));
    }

    Ok(())
}

fn validate_logging(logging: &LoggingConfig) -> Result<(), ConfigError> {
    let level = logging.level.trim().to_ascii_lowercase();
    match level.as_str() {
        "trace" | "debug" | "info" | "warn" | "error" => Ok(()),
        _ => Err(ConfigError::Validation(
            "logging.level must be one of trace|debug|info|warn|error".to_string(),
        )),
    }
}

fn read_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn parse_u16(key: &str, value: &str) -> Result<u16, ConfigError> {
    value.parse::<u16>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_u32(key: &str, value: &str) -> Result<u32, ConfigError> {
    value.parse::<u32>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_u64(key: &str, value: &str) -> Result<u64, ConfigError> {
    value.parse::<u64>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_bool(key: &str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidEnvOverride { key: key.to_string(), value: value.to_string() }),
    }
}

#[derive(Debug, Default, Deserialize)]
struct ConfigPatch {
    crm: Option<CrmPatch>,
    llm: Option<LlmPatch>,
    fetch: Option<FetchPatch>,
    server: Option<ServerPatch>,
    logging: Option<LoggingPatch>,
}

#[derive(Debug, Default, Deserialize)]
struct CrmPatch {
    api_base_url: Option<String>,
    auth_url: Option<String>,
    auth_scheme: Option<String>,
    client_id: Option<String>,
    client_secret: Option<String>,
    refresh_token: Option<String>,
    request_timeout_secs: Option<u64>,
    token_refresh_margin_secs: Option<u64>,
    modules_path: Option<PathBuf>,
}

#[derive(Debug, Default, Deserialize)]
struct LlmPatch {
    provider: Option<LlmProvider>,
    api_key: Option<String>,
    base_url: Option<String>,
    model: Option<String>,
    timeout_secs: Option<u64>,
    max_retries: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
struct FetchPatch {
    max_concurrency: Option<usize>,
    related_timeout_secs: Option<u64>,
    related_per_page: Option<u32>,
    search_per_page: Option<u32>,
    read_retries: Option<u32>,
    select_related: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
struct ServerPatch {
    bind_address: Option<String>,
    port: Option<u16>,
    graceful_shutdown_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct LoggingPatch {
    level: Option<String>,
    format: Option<LogFormat>,
}

#[cfg(test)]
mod tests {
    use std::env;
    use std::fs;
    use std::io;
    use std::sync::{Mutex, OnceLock};

    use secrecy::ExposeSecret;
    use tempfile::TempDir;

    use super::{AppConfig, ConfigError, ConfigOverrides, LoadOptions, LogFormat};

    static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();

    const CREDENTIAL_VARS: [&str; 4] = [
        "CLIENTDESK_CRM_CLIENT_ID",
        "CLIENTDESK_CRM_CLIENT_SECRET",
        "CLIENTDESK_CRM_REFRESH_TOKEN",
        "CLIENTDESK_LLM_API_KEY",
    ];

    fn env_lock() -> &'static Mutex<()> {
        ENV_LOCK.get_or_init(|| Mutex::new(()))
    }

    fn set_credentials() {
        env::set_var("CLIENTDESK_CRM_CLIENT_ID", "1000.client");
        env::set_var("CLIENTDESK_CRM_CLIENT_SECRET", "client-secret-value");
        env::set_var("CLIENTDESK_CRM_REFRESH_TOKEN", "1000.refresh-token-value");
        env::set_var("CLIENTDESK_LLM_API_KEY", "llm-key-value");
    }

    fn clear_vars(vars: &[&str]) {
        for var in vars {
            env::remove_var(var);
        }
    }

    fn ensure(condition: bool, message: &'static str) -> Result<(), String> {
        if condition {
            Ok(())
        } else {
            Err(message.to_string())
        }
    }

    #[test]
    fn file_load_supports_env_interpolation() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("TEST_ZOHO_REFRESH", "1000.from-env");
        env::set_var("TEST_GEMINI_KEY", "gemini-from-env");

        let result = (|| -> Result<(), String> {
            let dir = TempDir::new().map_err(|err: io::Error| err.to_string())?;
            let path = dir.path().join("clientdesk.toml");
            fs::write(
                &path,
                r#"
[crm]
client_id = "1000.file-client"
client_secret = "file-secret"
refresh_token = "${TEST_ZOHO_REFRESH}"

[llm]
api_key = "${TEST_GEMINI_KEY}"
"#,
            )
            .map_err(|err| err.to_string())?;

            let config =
                AppConfig::load(LoadOptions { config_path: Some(path), ..LoadOptions::default() })
                    .map_err(|err| format!("config load failed: {err}"))?;

            ensure(
                config.crm.refresh_token.expose_secret() == "1000.from-env",
                "refresh token should be interpolated from environment",
            )?;
            ensure(
                config.llm.api_key.as_ref().map(|key| key.expose_secret() == "gemini-from-env")
                    == Some(true),
                "llm api key should be interpolated from environment",
            )?;
            Ok(())
        })();

        clear_vars(&["TEST_ZOHO_REFRESH", "TEST_GEMINI_KEY"]);
        result
    }

    #[test]
    fn logging_env_aliases_are_supported() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        set_credentials();
        env::set_var("CLIENTDESK_LOG_LEVEL", "warn");
        env::set_var("CLIENTDESK_LOG_FORMAT", "pretty");

        let result = (|| -> Result<(), String> {
            let config = AppConfig::load(LoadOptions::default())
                .map_err(|err| format!("config load failed: {err}"))?;

            ensure(config.logging.level == "warn", "warning log level should be set from env var")?;
            ensure(
                matches!(config.logging.format, LogFormat::Pretty),
                "pretty logging format should be set from env var",
            )?;
            Ok(())
        })();

        clear_vars(&CREDENTIAL_VARS);
        clear_vars(&["CLIENTDESK_LOG_LEVEL", "CLIENTDESK_LOG_FORMAT"]);
        result
    }

    #[test]
    fn precedence_defaults_file_env_overrides() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        set_credentials();
        env::set_var("CLIENTDESK_FETCH_RELATED_TIMEOUT_SECS", "7");

        let result = (|| -> Result<(), String> {
            let dir = TempDir::new().map_err(|err: io::Error| err.to_string())?;
            let path = dir.path().join("clientdesk.toml");
            fs::write(
                &path,
                r#"
[crm]
api_base_url = "https://www.zohoapis.com.au/crm/v2"

[fetch]
related_timeout_secs = 3
max_concurrency = 4

[logging]
level = "warn"
"#,
            )
            .map_err(|err| err.to_string())?;

            let config = AppConfig::load(LoadOptions {
                config_path: Some(path),
                overrides: ConfigOverrides {
                    log_level: Some("debug".to_string()),
                    crm_api_base_url: Some("https://crm.example.test/v2".to_string()),
                    ..ConfigOverrides::default()
                },
                ..LoadOptions::default()
            })
            .map_err(|err| format!("config load failed: {err}"))?;

            ensure(
                config.crm.api_base_url == "https://crm.example.test/v2",
                "override api base url should win",
            )?;
            ensure(config.logging.level == "debug", "overridden log level should be debug")?;
            ensure(config.fetch.related_timeout_secs == 7, "env timeout should win over file")?;
            ensure(config.fetch.max_concurrency == 4, "file concurrency should win over default")?;
            Ok(())
        })();

        clear_vars(&CREDENTIAL_VARS);
        clear_vars(&["CLIENTDESK_FETCH_RELATED_TIMEOUT_SECS"]);
        result
    }

    #[test]
    fn validation_fails_fast_with_actionable_error() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        clear_vars(&CREDENTIAL_VARS);
        env::set_var("CLIENTDESK_LLM_API_KEY", "llm-key-value");

        let result = (|| -> Result<(), String> {
            let error = match AppConfig::load(LoadOptions::default()) {
                Ok(_) => {
                    return Err("expected validation failure but config load succeeded".to_string())
                }
                Err(error) => error,
            };
            let has_message = matches!(
                error,
                ConfigError::Validation(ref message) if message.contains("crm.client_id")
            );
            ensure(has_message, "validation failure should mention crm.client_id")
        })();

        clear_vars(&CREDENTIAL_VARS);
        result
    }

    #[test]
    fn fetch_bounds_are_validated() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        set_credentials();
        env::set_var("CLIENTDESK_FETCH_MAX_CONCURRENCY", "0");

        let result = (|| -> Result<(), String> {
            let has_message = matches!(
                AppConfig::load(LoadOptions::default()),
                Err(ConfigError::Validation(ref message)) if message.contains("fetch.max_concurrency")
            );
            ensure(has_message, "zero concurrency should be rejected")
        })();

        clear_vars(&CREDENTIAL_VARS);
        clear_vars(&["CLIENTDESK_FETCH_MAX_CONCURRENCY"]);
        result
    }

    #[test]
    fn related_selection_flag_reads_file_and_env() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        set_credentials();

        let result = (|| -> Result<(), String> {
            let dir = TempDir::new().map_err(|err: io::Error| err.to_string())?;
            let path = dir.path().join("clientdesk.toml");
            fs::write(&path, "[fetch]\nselect_related = true\n").map_err(|err| err.to_string())?;

            let options = || LoadOptions { config_path: Some(path.clone()), ..LoadOptions::default() };
            let config = AppConfig::load(options()).map_err(|err| format!("config load failed: {err}"))?;
            ensure(config.fetch.select_related, "file should turn selection on")?;

            env::set_var("CLIENTDESK_FETCH_SELECT_RELATED", "off");
            let config = AppConfig::load(options()).map_err(|err| format!("config load failed: {err}"))?;
            ensure(!config.fetch.select_related, "env should win over file")?;

            env::set_var("CLIENTDESK_FETCH_SELECT_RELATED", "sometimes");
            let rejected = matches!(
                AppConfig::load(options()),
                Err(ConfigError::InvalidEnvOverride { ref key, .. }) if key == "CLIENTDESK_FETCH_SELECT_RELATED"
            );
            ensure(rejected, "unreadable flag should be rejected")
        })();

        clear_vars(&CREDENTIAL_VARS);
        clear_vars(&["CLIENTDESK_FETCH_SELECT_RELATED"]);
        result
    }

    #[test]
    fn secret_values_are_not_leaked_by_debug() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        set_credentials();

        let result = (|| -> Result<(), String> {
            let config = AppConfig::load(LoadOptions::default())
                .map_err(|err| format!("config load failed: {err}"))?;
            let debug = format!("{config:?}");

            ensure(
                !debug.contains("client-secret-value"),
                "debug output should not contain the client secret",
            )?;
            ensure(
                !debug.contains("refresh-token-value"),
                "debug output should not contain the refresh token",
            )?;
            ensure(!debug.contains("llm-key-value"), "debug output should not contain the llm key")?;
            ensure(
                matches!(config.logging.format, LogFormat::Compact),
                "default logging format should be compact",
            )?;
            Ok(())
        })();

        clear_vars(&CREDENTIAL_VARS);
        result
    }
}
