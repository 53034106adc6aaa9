use serde::{Deserialize, Serialize};

use crate::executor::StepReport;

/// How many earlier turns go into any prompt.
pub const HISTORY_WINDOW: usize = 3;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn label(self) -> &'static str {
        match self {
            Self::User => "User",
            Self::Assistant => "AI",
        }
    }
}

/// One turn of the history the client echoes back with each request.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub role: Role,
    pub content: String,
    #[serde(default)]
    pub requires_confirmation: bool,
}

impl ConversationTurn {
    pub fn user(content: impl Into<String>) -> Self {
        Self { role: Role::User, content: content.into(), requires_confirmation: false }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self { role: Role::Assistant, content: content.into(), requires_confirmation: false }
    }

    pub fn confirmation_request(content: impl Into<String>) -> Self {
        Self { role: Role::Assistant, content: content.into(), requires_confirmation: true }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatRequest {
    #[serde(alias = "module")]
    pub slug: String,
    #[serde(default, alias = "id")]
    pub record_id: Option<String>,
    pub query: String,
    #[serde(default)]
    pub confirmed: bool,
    #[serde(default)]
    pub history: Vec<ConversationTurn>,
    /// Related lists to load for the caller's record; module defaults when absent.
    #[serde(default, alias = "modules")]
    pub related: Option<Vec<String>>,
}

impl ChatRequest {
    pub fn new(slug: impl Into<String>, record_id: Option<&str>, query: impl Into<String>) -> Self {
        Self {
            slug: slug.into(),
            record_id: record_id.map(str::to_string),
            query: query.into(),
            confirmed: false,
            history: Vec::new(),
            related: None,
        }
    }

    pub fn confirmed(mut self) -> Self {
        self.confirmed = true;
        self
    }

    pub fn with_history(mut self, history: Vec<ConversationTurn>) -> Self {
        self.history = history;
        self
    }

    pub fn with_related<I, S>(mut self, lists: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.related = Some(lists.into_iter().map(Into::into).collect());
        self
    }

    /// Caller id with blank values treated as absent.
    pub fn active_record_id(&self) -> Option<&str> {
        self.record_id.as_deref().map(str::trim).filter(|id| !id.is_empty())
    }

    pub fn confirmation(&self) -> ConfirmationState {
        ConfirmationState::from_history(self.confirmed, &self.history, &self.query)
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatResponse {
    pub answer: String,
    pub requires_confirmation: bool,
    #[serde(default)]
    pub steps: Vec<StepReport>,
}

/// Per-request confirmation facts; never stored between requests.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ConfirmationState {
    pub confirmed: bool,
    pub prior_verify_confirmed: bool,
}

impl ConfirmationState {
    pub fn unconfirmed() -> Self {
        Self::default()
    }

    pub fn confirmed() -> Self {
        Self { confirmed: true, prior_verify_confirmed: false }
    }

    /// A prior verify counts as confirmed when the latest assistant turn asked
    /// for confirmation and the user answered it affirmatively, either in a
    /// later history turn or in the current query.
    pub fn from_history(confirmed: bool, history: &[ConversationTurn], query: &str) -> Self {
        let last_assistant = history.iter().rposition(|turn| turn.role == Role::Assistant);
        let prior_verify_confirmed = match last_assistant {
            Some(position) if history[position].requires_confirmation => {
                let replies = history[position + 1..].iter().filter(|turn| turn.role == Role::User);
                let mut answers = replies.map(|turn| turn.content.as_str()).collect::<Vec<_>>();
                answers.push(query);
                answers.into_iter().rev().find(|text| !text.trim().is_empty()).is_some_and(is_affirmative)
            }
            _ => false,
        };

        Self { confirmed, prior_verify_confirmed }
    }

    pub fn allows_write(&self) -> bool {
        self.confirmed || self.prior_verify_confirmed
    }
}

pub fn is_affirmative(text: &str) -> bool {
    let normalized = normalize_text(text);
    let tokens = tokenize(&normalized);
    let Some(first) = tokens.first() else {
        return false;
    };

    if matches!(
        first.as_str(),
        "yes" | "y" | "yep" | "yeah" | "yup" | "confirm" | "confirmed" | "proceed" | "ok" | "okay" | "sure"
            | "approved" | "correct"
    ) {
        return true;
    }

    ["go ahead", "do it", "please do", "sounds good"].iter().any(|phrase| normalized.starts_with(phrase))
}

pub fn recent_history(history: &[ConversationTurn]) -> &[ConversationTurn] {
    let start = history.len().saturating_sub(HISTORY_WINDOW);
    &history[start..]
}

fn normalize_text(text: &str) -> String {
    text.trim().to_ascii_lowercase()
}

fn tokenize(text: &str) -> Vec<String> {
    let mut sanitized = String::with_capacity(text.len());
    for character in text.chars() {
        if character.is_ascii_alphanumeric() {
            sanitized.push(character);
        } else {
            sanitized.push(' ');
        }
    }
    sanitized.split_whitespace().map(|token| token.to_string()).collect()
}
