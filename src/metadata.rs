//! Key/value metadata attached to overlays.

use crate::error::Result;
use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;

/// First write wins: adding an existing key keeps the stored value.
#[derive(Debug, Default)]
pub struct MetadataStore {
    entries: RwLock<HashMap<String, Value>>,
}

impl MetadataStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` if the key was not present and the value was stored.
    pub fn add(&self, key: impl Into<String>, value: Value) -> bool {
        insert_first(&mut self.entries.write(), key.into(), value)
    }

    /// Serializes `value` before storing it.
    pub fn add_as<T: Serialize>(&self, key: impl Into<String>, value: &T) -> Result<bool> {
        let value = serde_json::to_value(value)?;
        Ok(self.add(key, value))
    }

    pub fn remove(&self, key: &str) -> Option<Value> {
        self.entries.write().remove(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.read().contains_key(key)
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        self.entries.read().get(key).cloned()
    }

    /// Typed read. `Ok(None)` when the key is absent.
    pub fn get_as<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        match self.get(key) {
            Some(value) => Ok(Some(serde_json::from_value(value)?)),
            None => Ok(None),
        }
    }

    pub fn keys(&self) -> Vec<String> {
        self.entries.read().keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

pub(crate) fn insert_first(map: &mut HashMap<String, Value>, key: String, value: Value) -> bool {
    match map.entry(key) {
        std::collections::hash_map::Entry::Occupied(_) => false,
        std::collections::hash_map::Entry::Vacant(slot) => {
            slot.insert(value);
            true
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use serde_json::json;

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct Reward {
        item: String,
        amount: u32,
    }

    #[test]
    fn first_write_wins() {
        let store = MetadataStore::new();
        assert!(store.add("owner", json!("alice")));
        assert!(!store.add("owner", json!("bob")));
        assert_eq!(store.get("owner"), Some(json!("alice")));
    }

    #[test]
    fn remove_then_add_replaces() {
        let store = MetadataStore::new();
        store.add("tier", json!(1));
        assert_eq!(store.remove("tier"), Some(json!(1)));
        assert!(!store.contains("tier"));
        assert!(store.add("tier", json!(2)));
        assert_eq!(store.get("tier"), Some(json!(2)));
    }

    #[test]
    fn typed_round_trip() {
        let store = MetadataStore::new();
        let reward = Reward {
            item: "minecraft:diamond".into(),
            amount: 3,
        };
        assert!(store.add_as("reward", &reward).unwrap());
        assert_eq!(store.get_as::<Reward>("reward").unwrap(), Some(reward));
        assert_eq!(store.get_as::<Reward>("missing").unwrap(), None);
        assert!(store.get_as::<u32>("reward").is_err());
    }
}
