//! External commands fetched from storage during reconciliation.
//!
//! Every command is resolved to a terminal state in the pass that fetched
//! it; none are left pending.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::entity::EntityId;

/// Reason recorded when a kill command succeeded.
pub const REASON_KILLED: &str = "killed";

/// Reason recorded when a kill command's target is not simulated.
pub const REASON_TARGET_UNKNOWN: &str = "target not known / not active";

/// Reason recorded for commands of an unrecognized kind.
pub const REASON_COMMAND_UNKNOWN: &str = "command not known";

/// Storage-assigned command identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CommandId(i64);

impl CommandId {
    /// Creates a command ID from its external value.
    #[must_use]
    pub const fn new(value: i64) -> Self {
        Self(value)
    }

    /// Returns the external value.
    #[must_use]
    pub const fn get(self) -> i64 {
        self.0
    }
}

impl fmt::Display for CommandId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// What a command asks for.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum CommandKind {
    /// Force the target entity to eliminate itself.
    Kill,
    /// Anything this server does not understand.
    Unknown(String),
}

impl CommandKind {
    /// Returns the storage representation.
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Kill => "kill",
            Self::Unknown(s) => s,
        }
    }
}

impl From<&str> for CommandKind {
    fn from(s: &str) -> Self {
        match s {
            "kill" => Self::Kill,
            other => Self::Unknown(other.to_string()),
        }
    }
}

impl From<String> for CommandKind {
    fn from(s: String) -> Self {
        Self::from(s.as_str())
    }
}

impl From<CommandKind> for String {
    fn from(kind: CommandKind) -> Self {
        kind.as_str().to_string()
    }
}

/// A pending command as stored externally.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExternalCommand {
    pub id: CommandId,
    pub kind: CommandKind,
    pub target: EntityId,
}

/// Terminal state of a command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandCompletion {
    pub success: bool,
    pub reason: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_parses_kill_and_keeps_unknown_text() {
        assert_eq!(CommandKind::from("kill"), CommandKind::Kill);
        assert_eq!(CommandKind::from("respawn"), CommandKind::Unknown("respawn".to_string()));
        assert_eq!(CommandKind::from("respawn").as_str(), "respawn");
    }

    #[test]
    fn command_deserializes_from_storage_json() {
        let cmd: ExternalCommand = serde_json::from_str(r#"{"id": 3, "kind": "kill", "target": 42}"#).unwrap();
        assert_eq!(cmd.id, CommandId::new(3));
        assert_eq!(cmd.kind, CommandKind::Kill);
        assert_eq!(cmd.target, EntityId::new(42));
    }
}
