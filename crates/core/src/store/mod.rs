//! Seam between the orchestrator and the remote CRM.

pub mod memory;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

use crate::domain::record::{display_value, Fields};
use crate::errors::{ApplicationError, UpstreamService};

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("record not found")]
    NotFound,
    #[error("no content")]
    NoContent,
    #[error("remote returned status {status}: {body}")]
    Status { status: u16, body: String },
    #[error("request timed out")]
    Timeout,
    #[error("transport failure: {0}")]
    Transport(String),
    #[error("could not decode response: {0}")]
    Decode(String),
    #[error("authentication failed: {0}")]
    Auth(String),
}

impl StoreError {
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Timeout | Self::Transport(_) => true,
            Self::Status { status, .. } => *status == 429 || *status >= 500,
            Self::NotFound | Self::NoContent | Self::Decode(_) | Self::Auth(_) => false,
        }
    }

    pub fn into_upstream(self) -> ApplicationError {
        let service =
            if matches!(self, Self::Auth(_)) { UpstreamService::Auth } else { UpstreamService::Crm };
        let retryable = self.is_retryable();
        ApplicationError::upstream(service, self.to_string(), retryable)
    }
}

/// `(field:equals:value)` search criteria.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Criteria {
    Equals { field: String, value: String },
    And(Vec<Criteria>),
}

impl Criteria {
    pub fn equals(field: impl Into<String>, value: impl Into<String>) -> Self {
        Self::Equals { field: field.into(), value: value.into() }
    }

    /// Wire form; parentheses and commas inside values are backslash-escaped.
    pub fn render(&self) -> String {
        match self {
            Self::Equals { field, value } => format!("({field}:equals:{})", escape_value(value)),
            Self::And(parts) => {
                let inner = parts.iter().map(Criteria::render).collect::<Vec<_>>().join("and");
                format!("({inner})")
            }
        }
    }

    /// Whether a raw row satisfies these criteria (case-insensitive equality).
    pub fn matches(&self, row: &Fields) -> bool {
        match self {
            Self::Equals { field, value } => row.get(field).is_some_and(|candidate| {
                let shown = display_value(candidate).is_some_and(|shown| shown.eq_ignore_ascii_case(value));
                let linked = candidate.get("id").and_then(Value::as_str) == Some(value.as_str());
                shown || linked
            }),
            Self::And(parts) => parts.iter().all(|part| part.matches(row)),
        }
    }
}

fn escape_value(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for ch in value.chars() {
        if matches!(ch, '(' | ')' | ',' | '\\') {
            escaped.push('\\');
        }
        escaped.push(ch);
    }
    escaped
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SearchQuery {
    Criteria(Criteria),
    Word(String),
}

/// Remote CRM operations the core depends on. Rows are the raw JSON objects
/// the store returns; implementations map "no rows" on reads to
/// `StoreError::NotFound` or `StoreError::NoContent`.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    async fn get_record(&self, module: &str, id: &str) -> Result<Fields, StoreError>;

    /// Primary fetch for the user directory, which has its own id space.
    async fn get_user(&self, id: &str) -> Result<Fields, StoreError>;

    async fn get_related(
        &self,
        module: &str,
        id: &str,
        list: &str,
        per_page: u32,
    ) -> Result<Vec<Fields>, StoreError>;

    async fn search(
        &self,
        module: &str,
        query: &SearchQuery,
        per_page: u32,
    ) -> Result<Vec<Fields>, StoreError>;

    /// Returns the remote response row for the created record.
    async fn create(&self, module: &str, data: &Fields) -> Result<Fields, StoreError>;

    async fn update(&self, module: &str, id: &str, data: &Fields) -> Result<Fields, StoreError>;
}
