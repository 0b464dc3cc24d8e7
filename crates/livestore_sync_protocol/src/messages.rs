//! Invalidation messages.

use crate::error::{ProtocolError, ProtocolResult};
use serde::{Deserialize, Serialize};

/// Prefix shared by every network refresh event.
pub const REFRESH_PREFIX: &str = "refresh:";

/// Generic network event name: "something in this table changed".
pub const REFRESH_DATA: &str = "refresh:data";

/// Action carried by a cross-context message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContextAction {
    /// Reload the named table from the shared document, then notify.
    Refresh,
}

/// A same-host broadcast between execution contexts.
///
/// Wire form: `{"action": "refresh", "table": "<name>"}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextMessage {
    /// What the receiver should do.
    pub action: ContextAction,
    /// Table that changed.
    pub table: String,
}

impl ContextMessage {
    /// Creates a refresh message.
    pub fn refresh(table: impl Into<String>) -> Self {
        Self {
            action: ContextAction::Refresh,
            table: table.into(),
        }
    }
}

/// A network invalidation event relayed between sessions.
///
/// The generic event is `refresh:data`. High-frequency domains also emit a
/// narrower event such as `refresh:polls`. Both name the table and are
/// equivalent invalidation hints for it.
///
/// Wire form: `{"event": "refresh:data", "table": "<name>"}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkEvent {
    /// Event name, always in the `refresh:` namespace.
    pub event: String,
    /// Table that changed.
    pub table: String,
}

impl NetworkEvent {
    /// Creates the generic `refresh:data` event.
    pub fn refresh_data(table: impl Into<String>) -> Self {
        Self {
            event: REFRESH_DATA.to_string(),
            table: table.into(),
        }
    }

    /// Creates a domain-specific event, e.g. `refresh:polls`.
    pub fn domain(domain: &str, table: impl Into<String>) -> Self {
        Self {
            event: format!("{REFRESH_PREFIX}{domain}"),
            table: table.into(),
        }
    }

    /// Returns the domain of a narrow event, or `None` for `refresh:data`.
    pub fn domain_name(&self) -> Option<&str> {
        match self.event.strip_prefix(REFRESH_PREFIX) {
            Some("data") | None => None,
            Some(domain) => Some(domain),
        }
    }

    /// Returns true if the event is in the `refresh:` namespace.
    pub fn is_refresh(&self) -> bool {
        self.event.starts_with(REFRESH_PREFIX) && self.event.len() > REFRESH_PREFIX.len()
    }

    /// Checks that the event is a refresh event.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::NotRefresh`] for any other event name.
    pub fn validate(&self) -> ProtocolResult<()> {
        if self.is_refresh() {
            Ok(())
        } else {
            Err(ProtocolError::NotRefresh(self.event.clone()))
        }
    }
}
