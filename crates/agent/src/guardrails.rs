use clientdesk_core::domain::action::ActionKind;

use crate::conversation::ConfirmationState;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum GuardrailIntent {
    Write { module: String, action: ActionKind },
}

impl GuardrailIntent {
    pub fn write(module: impl Into<String>, action: ActionKind) -> Self {
        Self::Write { module: module.into(), action }
    }

    pub fn module(&self) -> &str {
        match self {
            Self::Write { module, .. } => module,
        }
    }

    pub fn action_key(&self) -> String {
        match self {
            Self::Write { action, .. } => format!("crm.{}", action.as_str()),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum GuardrailDecision {
    Allow,
    Deny { reason_code: &'static str, user_message: String, fallback_path: &'static str },
    Degrade { reason_code: &'static str, user_message: String, fallback_path: &'static str },
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GuardrailPolicy {
    pub writes_enabled: bool,
}

impl Default for GuardrailPolicy {
    fn default() -> Self {
        Self { writes_enabled: true }
    }
}

impl GuardrailPolicy {
    pub fn read_only() -> Self {
        Self { writes_enabled: false }
    }

    /// A write is allowed only when the caller confirmed this request or an
    /// earlier confirmation request was answered affirmatively.
    pub fn evaluate(&self, intent: &GuardrailIntent, confirmation: &ConfirmationState) -> GuardrailDecision {
        match intent {
            GuardrailIntent::Write { module, .. } if !self.writes_enabled => GuardrailDecision::Deny {
                reason_code: "writes_disabled",
                user_message: format!(
                    "Changes to {module} are disabled in this deployment. I can still answer questions about it."
                ),
                fallback_path: "read_only_answer",
            },
            GuardrailIntent::Write { .. } if confirmation.allows_write() => GuardrailDecision::Allow,
            GuardrailIntent::Write { module, action } => GuardrailDecision::Degrade {
                reason_code: "confirmation_required",
                user_message: format!(
                    "Please confirm: should I {action} this {module} record? Reply \"Yes\" to proceed."
                ),
                fallback_path: "request_confirmation",
            },
        }
    }
}
