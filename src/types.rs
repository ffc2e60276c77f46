//! Core identifier types used throughout the pool
//!
//! This module provides the canonical host key plus the identifiers the pool
//! hands out for connections and queued lease requests.

use serde::{Deserialize, Serialize};

/// Canonical `"host:port"` key identifying one remote endpoint.
///
/// Every pool structure is keyed by this value; two requests naming the same
/// host and port share the same per-host queues and quota.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct HostKey(String);

impl HostKey {
    /// Build the canonical key for a host and port
    #[must_use]
    pub fn new(host: &str, port: u16) -> Self {
        Self(format!("{}:{}", host, port))
    }

    /// The `"host:port"` string, suitable for address resolution
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for HostKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<(&str, u16)> for HostKey {
    fn from((host, port): (&str, u16)) -> Self {
        Self::new(host, port)
    }
}

/// Identifier for a pooled connection
///
/// Assigned once when the connection is established and stable across
/// idle/leased transitions, so log lines can follow a single socket through
/// its lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnId(u64);

impl ConnId {
    #[inline]
    pub(crate) const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Get the underlying counter value
    #[must_use]
    #[inline]
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for ConnId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "conn#{}", self.0)
    }
}

/// Identifier for a queued lease request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WaiterId(u64);

impl WaiterId {
    #[inline]
    pub(crate) const fn new(raw: u64) -> Self {
        Self(raw)
    }
}

impl std::fmt::Display for WaiterId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "req#{}", self.0)
    }
}

/// Helper for serializing Duration as integer milliseconds
pub mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_host_key_format() {
        let key = HostKey::new("example.com", 11210);
        assert_eq!(key.as_str(), "example.com:11210");
        assert_eq!(format!("{}", key), "example.com:11210");
    }

    #[test]
    fn test_host_key_equality() {
        let a = HostKey::new("10.0.0.1", 8091);
        let b = HostKey::new("10.0.0.1", 8091);
        let c = HostKey::new("10.0.0.1", 8092);
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_host_key_hash() {
        use std::collections::HashSet;

        let mut set = HashSet::new();
        set.insert(HostKey::new("a", 1));
        set.insert(HostKey::new("a", 1));
        set.insert(HostKey::new("b", 1));
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn test_host_key_from_tuple() {
        let key: HostKey = ("localhost", 4150).into();
        assert_eq!(key.as_str(), "localhost:4150");
    }

    #[test]
    fn test_conn_id_display() {
        let id = ConnId::new(7);
        assert_eq!(format!("{}", id), "conn#7");
        assert_eq!(id.as_u64(), 7);
    }

    #[test]
    fn test_waiter_id_display() {
        let id = WaiterId::new(3);
        assert_eq!(format!("{}", id), "req#3");
    }

    #[test]
    fn test_duration_ms_roundtrip() {
        use serde::{Deserialize, Serialize};
        use std::time::Duration;

        #[derive(Serialize, Deserialize)]
        struct Knobs {
            #[serde(with = "duration_ms")]
            timeout: Duration,
        }

        let knobs = Knobs {
            timeout: Duration::from_millis(1500),
        };
        let encoded = toml::to_string(&knobs).unwrap();
        assert!(encoded.contains("1500"));

        let decoded: Knobs = toml::from_str(&encoded).unwrap();
        assert_eq!(decoded.timeout, Duration::from_millis(1500));
    }
}
