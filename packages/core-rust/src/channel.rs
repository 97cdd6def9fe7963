use std::fmt;

use serde::{Deserialize, Serialize};

/// Logical group of related methods routed to one backend.
///
/// Channels are disjoint: a method name is only meaningful within its channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    /// Retired native recognition engine. Kept addressable for older callers.
    Legacy,
    /// Out-of-process helper environment (interpreter plus scripts).
    Environment,
    /// In-process recognition module.
    Embedded,
}

impl Channel {
    /// All channels, in routing-table order.
    pub const ALL: [Channel; 3] = [Channel::Legacy, Channel::Environment, Channel::Embedded];

    /// Wire identifier of this channel.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Channel::Legacy => "legacy",
            Channel::Environment => "environment",
            Channel::Embedded => "embedded",
        }
    }

    /// Parses a wire identifier. Returns `None` for unknown channels.
    #[must_use]
    pub fn parse(id: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.as_str() == id)
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_known_ids() {
        assert_eq!(Channel::parse("legacy"), Some(Channel::Legacy));
        assert_eq!(Channel::parse("environment"), Some(Channel::Environment));
        assert_eq!(Channel::parse("embedded"), Some(Channel::Embedded));
    }

    #[test]
    fn parse_is_case_sensitive_and_rejects_unknown() {
        assert_eq!(Channel::parse("Legacy"), None);
        assert_eq!(Channel::parse("openalpr"), None);
        assert_eq!(Channel::parse(""), None);
    }

    #[test]
    fn serde_uses_wire_ids() {
        let json = serde_json::to_string(&Channel::Embedded).unwrap();
        assert_eq!(json, "\"embedded\"");
        let back: Channel = serde_json::from_str("\"environment\"").unwrap();
        assert_eq!(back, Channel::Environment);
    }
}
