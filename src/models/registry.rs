//! Name-keyed, insertion-ordered entity containers
//!
//! A [`Registry`] owns the entities of one kind (compartments, species,
//! parameters, reactions). Names are unique within a registry; insertion is
//! atomic so that a failed batch leaves the registry untouched. Enumeration
//! follows insertion order, which makes DOF layout and logging deterministic.

use crate::error::{Result, SmartError};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::{HashMap, HashSet};

/// An entity stored in a [`Registry`]
pub trait Entity {
    /// Kind label used in error messages
    const KIND: &'static str;

    /// Unique name of the entity
    fn name(&self) -> &str;
}

/// Ordered container of uniquely named entities
#[derive(Debug, Clone, PartialEq)]
pub struct Registry<T> {
    entries: Vec<T>,
    index: HashMap<String, usize>,
}

impl<T> Default for Registry<T> {
    fn default() -> Self {
        Self {
            entries: Vec::new(),
            index: HashMap::new(),
        }
    }
}

impl<T: Entity> Registry<T> {
    /// Empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding `entities`, in order
    pub fn from_entities(entities: impl IntoIterator<Item = T>) -> Result<Self> {
        let mut registry = Self::new();
        registry.add(entities)?;
        Ok(registry)
    }

    /// Insert one or more entities
    ///
    /// Fails with [`SmartError::DuplicateName`] if any name already exists or
    /// appears twice in the batch; nothing is inserted in that case.
    pub fn add(&mut self, entities: impl IntoIterator<Item = T>) -> Result<()> {
        let batch: Vec<T> = entities.into_iter().collect();

        let mut seen = HashSet::with_capacity(batch.len());
        for entity in &batch {
            let name = entity.name();
            if self.index.contains_key(name) || !seen.insert(name) {
                return Err(SmartError::DuplicateName {
                    kind: T::KIND,
                    name: name.to_string(),
                });
            }
        }

        for entity in batch {
            self.index.insert(entity.name().to_string(), self.entries.len());
            self.entries.push(entity);
        }
        Ok(())
    }

    /// Entity by name
    pub fn get(&self, name: &str) -> Result<&T> {
        self.index
            .get(name)
            .map(|&i| &self.entries[i])
            .ok_or_else(|| SmartError::NotFound {
                kind: T::KIND,
                name: name.to_string(),
            })
    }

    /// Insertion position of `name`
    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.index.get(name).copied()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    /// Entity at insertion position `i`
    pub fn get_index(&self, i: usize) -> Option<&T> {
        self.entries.get(i)
    }

    /// Entities in insertion order
    pub fn iter(&self) -> std::slice::Iter<'_, T> {
        self.entries.iter()
    }

    /// Names in insertion order
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|e| e.name())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<'a, T> IntoIterator for &'a Registry<T> {
    type Item = &'a T;
    type IntoIter = std::slice::Iter<'a, T>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}

impl<T: Serialize> Serialize for Registry<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_seq(self.entries.iter())
    }
}

impl<'de, T: Entity + Deserialize<'de>> Deserialize<'de> for Registry<T> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let entries = Vec::<T>::deserialize(deserializer)?;
        Registry::from_entities(entries).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Item {
        name: String,
        value: i32,
    }

    impl Entity for Item {
        const KIND: &'static str = "item";

        fn name(&self) -> &str {
            &self.name
        }
    }

    fn item(name: &str, value: i32) -> Item {
        Item { name: name.to_string(), value }
    }

    #[test]
    fn test_insertion_order_preserved() {
        let registry = Registry::from_entities([item("c", 1), item("a", 2), item("b", 3)]).unwrap();
        let names: Vec<&str> = registry.names().collect();
        assert_eq!(names, vec!["c", "a", "b"]);
        assert_eq!(registry.index_of("a"), Some(1));
    }

    #[test]
    fn test_duplicate_in_batch_inserts_nothing() {
        let mut registry = Registry::from_entities([item("a", 1)]).unwrap();
        let err = registry.add([item("b", 2), item("b", 3)]).unwrap_err();
        assert!(matches!(err, SmartError::DuplicateName { kind: "item", ref name } if name == "b"));
        assert_eq!(registry.len(), 1);
        assert!(!registry.contains("b"));
    }

    #[test]
    fn test_duplicate_with_existing_inserts_nothing() {
        let mut registry = Registry::from_entities([item("a", 1)]).unwrap();
        assert!(registry.add([item("z", 9), item("a", 2)]).is_err());
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.get("a").unwrap().value, 1);
    }

    #[test]
    fn test_get_missing() {
        let registry: Registry<Item> = Registry::new();
        let err = registry.get("nope").unwrap_err();
        assert!(matches!(err, SmartError::NotFound { kind: "item", .. }));
    }

    #[test]
    fn test_serde_as_ordered_list() {
        let registry = Registry::from_entities([item("x", 1), item("y", 2)]).unwrap();
        let json = serde_json::to_string(&registry).unwrap();
        assert!(json.starts_with('['));
        let back: Registry<Item> = serde_json::from_str(&json).unwrap();
        assert_eq!(back, registry);

        let duplicated = r#"[{"name":"x","value":1},{"name":"x","value":2}]"#;
        assert!(serde_json::from_str::<Registry<Item>>(duplicated).is_err());
    }
}
