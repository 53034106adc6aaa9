use serde::{Deserialize, Serialize};

use crate::domain::record::Fields;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    Create,
    Update,
}

impl ActionKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Update => "update",
        }
    }
}

impl std::fmt::Display for ActionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A create/update instruction lifted out of generated text.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ActionProposal {
    pub action: ActionKind,
    pub module_slug: String,
    #[serde(default)]
    pub record_id: Option<String>,
    #[serde(default)]
    pub data: Fields,
}

/// What the remote store echoed back after a successful write.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct WriteOutcome {
    pub action: ActionKind,
    pub module: String,
    pub record_id: String,
    #[serde(default)]
    pub fields: Fields,
}
