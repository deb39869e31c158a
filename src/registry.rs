//! Process-wide discovery registry.
//!
//! Advisory key/value export describing what is running in this process
//! (e.g. which acceptor a server listens with). Nothing in the session core
//! reads it back.

use dashmap::DashMap;
use std::sync::OnceLock;

static REGISTRY: OnceLock<DashMap<Vec<String>, String>> = OnceLock::new();

fn registry() -> &'static DashMap<Vec<String>, String> {
    REGISTRY.get_or_init(DashMap::new)
}

fn to_key(key: &[&str]) -> Vec<String> {
    key.iter().map(|part| part.to_string()).collect()
}

/// Store `value` under `key`, replacing any previous value.
pub fn put(key: &[&str], value: impl Into<String>) {
    let value = value.into();
    tracing::trace!(key = ?key, value = %value, "Registry entry exported");
    registry().insert(to_key(key), value);
}

pub fn get(key: &[&str]) -> Option<String> {
    registry().get(&to_key(key)).map(|entry| entry.value().clone())
}

pub fn remove(key: &[&str]) -> Option<String> {
    registry().remove(&to_key(key)).map(|(_, value)| value)
}

/// Snapshot of all entries, sorted by key.
pub fn entries() -> Vec<(Vec<String>, String)> {
    let mut all: Vec<_> = registry()
        .iter()
        .map(|entry| (entry.key().clone(), entry.value().clone()))
        .collect();
    all.sort();
    all
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn put_get_remove() {
        let key = ["registry-test", "line", "unit", "Listener"];
        put(&key, "TcpAcceptor");
        assert_eq!(get(&key).as_deref(), Some("TcpAcceptor"));
        assert!(entries().iter().any(|(k, _)| k.first().map(String::as_str) == Some("registry-test")));

        put(&key, "Other");
        assert_eq!(get(&key).as_deref(), Some("Other"));
        assert_eq!(remove(&key).as_deref(), Some("Other"));
        assert!(get(&key).is_none());
    }
}
