//! Namespaced key/value context.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Context entries grouped by namespace.
///
/// Ordered maps keep serialization deterministic, which the snapshot
/// content hash depends on.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContextData(BTreeMap<String, BTreeMap<String, Value>>);

impl ContextData {
    /// Creates empty context.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets `namespace.key`, returning the previous value.
    pub fn set(
        &mut self,
        namespace: impl Into<String>,
        key: impl Into<String>,
        value: Value,
    ) -> Option<Value> {
        self.0
            .entry(namespace.into())
            .or_default()
            .insert(key.into(), value)
    }

    /// Returns `namespace.key`.
    #[must_use]
    pub fn get(&self, namespace: &str, key: &str) -> Option<&Value> {
        self.0.get(namespace).and_then(|ns| ns.get(key))
    }

    /// Removes `namespace.key`. An emptied namespace is dropped.
    pub fn remove(&mut self, namespace: &str, key: &str) -> Option<Value> {
        let ns = self.0.get_mut(namespace)?;
        let removed = ns.remove(key);
        if ns.is_empty() {
            self.0.remove(namespace);
        }
        removed
    }

    /// All entries of one namespace.
    #[must_use]
    pub fn namespace(&self, namespace: &str) -> Option<&BTreeMap<String, Value>> {
        self.0.get(namespace)
    }

    /// Namespace names in order.
    pub fn namespaces(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    /// Total number of entries across namespaces.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.values().map(BTreeMap::len).sum()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn namespaces_are_isolated() {
        let mut ctx = ContextData::new();
        ctx.set("planner", "step", json!(1));
        ctx.set("tools", "step", json!("search"));

        assert_eq!(ctx.get("planner", "step"), Some(&json!(1)));
        assert_eq!(ctx.get("tools", "step"), Some(&json!("search")));
        assert_eq!(ctx.len(), 2);
        assert_eq!(ctx.namespaces().collect::<Vec<_>>(), vec!["planner", "tools"]);
    }

    #[test]
    fn remove_drops_empty_namespace() {
        let mut ctx = ContextData::new();
        assert_eq!(ctx.set("a", "k", json!(1)), None);
        assert_eq!(ctx.set("a", "k", json!(2)), Some(json!(1)));
        assert_eq!(ctx.remove("a", "k"), Some(json!(2)));
        assert!(ctx.namespace("a").is_none());
        assert!(ctx.is_empty());
    }

    #[test]
    fn serializes_as_nested_object() {
        let mut ctx = ContextData::new();
        ctx.set("b", "x", json!(true));
        ctx.set("a", "y", json!(null));
        assert_eq!(
            serde_json::to_string(&ctx).unwrap(),
            r#"{"a":{"y":null},"b":{"x":true}}"#
        );
    }
}
