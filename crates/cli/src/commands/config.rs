use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use clientdesk_core::config::{AppConfig, LoadOptions};
use secrecy::{ExposeSecret, SecretString};
use toml::Value;

struct Entry {
    key: &'static str,
    env_key: Option<&'static str>,
    value: String,
}

impl Entry {
    fn new(key: &'static str, env_key: Option<&'static str>, value: impl Into<String>) -> Self {
        Self { key, env_key, value: value.into() }
    }
}

pub fn run() -> String {
    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => return format!("config validation failed: {error}"),
    };

    let config_file_path = detect_config_path();
    let config_file_doc = load_config_file_doc(config_file_path.as_deref());

    let mut lines = vec!["effective config (source precedence: env > file > default):".to_string()];
    for entry in entries(&config) {
        let source = field_source(
            entry.key,
            entry.env_key,
            config_file_doc.as_ref(),
            config_file_path.as_deref(),
        );
        lines.push(render_line(entry.key, &entry.value, source));
    }

    lines.join("\n")
}

fn entries(config: &AppConfig) -> Vec<Entry> {
    let crm = &config.crm;
    let llm = &config.llm;
    let modules_path = crm
        .modules_path
        .as_ref()
        .map(|path| path.display().to_string())
        .unwrap_or_else(|| "<builtin>".to_string());

    vec![
        Entry::new("crm.api_base_url", Some("CLIENTDESK_CRM_API_BASE_URL"), crm.api_base_url.as_str()),
        Entry::new("crm.auth_url", Some("CLIENTDESK_CRM_AUTH_URL"), crm.auth_url.as_str()),
        Entry::new("crm.auth_scheme", None, crm.auth_scheme.as_str()),
        Entry::new("crm.client_id", Some("CLIENTDESK_CRM_CLIENT_ID"), redact_client_id(&crm.client_id)),
        Entry::new("crm.client_secret", Some("CLIENTDESK_CRM_CLIENT_SECRET"), redact_secret(&crm.client_secret)),
        Entry::new("crm.refresh_token", Some("CLIENTDESK_CRM_REFRESH_TOKEN"), redact_secret(&crm.refresh_token)),
        Entry::new(
            "crm.request_timeout_secs",
            Some("CLIENTDESK_CRM_REQUEST_TIMEOUT_SECS"),
            crm.request_timeout_secs.to_string(),
        ),
        Entry::new("crm.token_refresh_margin_secs", None, crm.token_refresh_margin_secs.to_string()),
        Entry::new("crm.modules_path", Some("CLIENTDESK_CRM_MODULES_PATH"), modules_path),
        Entry::new("llm.provider", Some("CLIENTDESK_LLM_PROVIDER"), format!("{:?}", llm.provider)),
        Entry::new("llm.model", Some("CLIENTDESK_LLM_MODEL"), llm.model.as_str()),
        Entry::new("llm.base_url", Some("CLIENTDESK_LLM_BASE_URL"), llm.base_url.as_deref().unwrap_or("<unset>")),
        Entry::new(
            "llm.api_key",
            Some("CLIENTDESK_LLM_API_KEY"),
            if llm.api_key.is_some() { "<redacted>" } else { "<unset>" },
        ),
        Entry::new("llm.timeout_secs", Some("CLIENTDESK_LLM_TIMEOUT_SECS"), llm.timeout_secs.to_string()),
        Entry::new("llm.max_retries", Some("CLIENTDESK_LLM_MAX_RETRIES"), llm.max_retries.to_string()),
        Entry::new(
            "fetch.max_concurrency",
            Some("CLIENTDESK_FETCH_MAX_CONCURRENCY"),
            config.fetch.max_concurrency.to_string(),
        ),
        Entry::new(
            "fetch.related_timeout_secs",
            Some("CLIENTDESK_FETCH_RELATED_TIMEOUT_SECS"),
            config.fetch.related_timeout_secs.to_string(),
        ),
        Entry::new("fetch.related_per_page", None, config.fetch.related_per_page.to_string()),
        Entry::new("fetch.search_per_page", None, config.fetch.search_per_page.to_string()),
        Entry::new("fetch.read_retries", None, config.fetch.read_retries.to_string()),
        Entry::new(
            "fetch.select_related",
            Some("CLIENTDESK_FETCH_SELECT_RELATED"),
            config.fetch.select_related.to_string(),
        ),
        Entry::new("server.bind_address", Some("CLIENTDESK_SERVER_BIND_ADDRESS"), config.server.bind_address.as_str()),
        Entry::new("server.port", Some("CLIENTDESK_SERVER_PORT"), config.server.port.to_string()),
        Entry::new("server.graceful_shutdown_secs", None, config.server.graceful_shutdown_secs.to_string()),
        Entry::new("logging.level", Some("CLIENTDESK_LOGGING_LEVEL"), config.logging.level.as_str()),
        Entry::new("logging.format", Some("CLIENTDESK_LOGGING_FORMAT"), format!("{:?}", config.logging.format)),
    ]
}

fn detect_config_path() -> Option<PathBuf> {
    [PathBuf::from("clientdesk.toml"), PathBuf::from("config/clientdesk.toml")]
        .into_iter()
        .find(|path| path.exists())
}

fn load_config_file_doc(path: Option<&Path>) -> Option<Value> {
    let path = path?;
    let raw = fs::read_to_string(path).ok()?;
    toml::from_str::<Value>(&raw).ok()
}

fn field_source(
    key_path: &str,
    env_key: Option<&str>,
    config_file_doc: Option<&Value>,
    config_file_path: Option<&Path>,
) -> String {
    if let Some(env_key) = env_key {
        if env::var_os(env_key).is_some() {
            return format!("env ({env_key})");
        }
    }

    if let Some(doc) = config_file_doc {
        if contains_path(doc, key_path) {
            let file_path = config_file_path
                .map(|path| path.display().to_string())
                .unwrap_or_else(|| "config file".to_string());
            return format!("file ({file_path})");
        }
    }

    "default".to_string()
}

fn contains_path(root: &Value, key_path: &str) -> bool {
    let mut current = root;
    for key in key_path.split('.') {
        let Some(next) = current.get(key) else {
            return false;
        };
        current = next;
    }
    true
}

fn render_line(key: &str, value: &str, source: String) -> String {
    format!("- {key} = {value} (source: {source})")
}

/// Zoho client ids look like `1000.XXXX`; the numeric prefix is safe to show.
fn redact_client_id(client_id: &str) -> String {
    let trimmed = client_id.trim();
    if trimmed.is_empty() {
        return "<empty>".to_string();
    }

    if let Some((prefix, _)) = trimmed.split_once('.') {
        return format!("{prefix}.***");
    }

    "<redacted>".to_string()
}

fn redact_secret(secret: &SecretString) -> String {
    if secret.expose_secret().trim().is_empty() {
        "<empty>".to_string()
    } else {
        "<redacted>".to_string()
    }
}
