use std::{collections::HashMap, sync::Arc};

use parking_lot::RwLock;
use tracing::debug;

use crate::{
    error::{Error, Result},
    object::StructuredObject,
};

/// Produces a fresh, empty object ready to be populated from payload bytes.
pub type ObjectFactory = Arc<dyn Fn() -> Box<dyn StructuredObject> + Send + Sync>;

/// Maps type tags to the factories that decode them.
///
/// Registering a tag twice replaces the earlier factory. Lookups clone the
/// factory handle out of the lock, so a factory or handler may register new
/// types while a decode is in progress.
#[derive(Default)]
pub struct TypeRegistry {
    factories: RwLock<HashMap<String, ObjectFactory>>,
}

impl TypeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, tag: impl Into<String>, factory: ObjectFactory) -> Result<()> {
        let tag = tag.into();
        if tag.is_empty() {
            return Err(Error::EmptyTag);
        }

        let mut factories = self.factories.write();
        if factories.insert(tag.clone(), factory).is_some() {
            debug!(%tag, "replaced previously registered decoder");
        }
        Ok(())
    }

    /// Registers `T::default` as the factory for `tag`.
    pub fn register_default<T>(&self, tag: impl Into<String>) -> Result<()>
    where
        T: StructuredObject + Default,
    {
        self.register(
            tag,
            Arc::new(|| Box::new(T::default()) as Box<dyn StructuredObject>),
        )
    }

    pub fn resolve(&self, tag: &str) -> Option<ObjectFactory> {
        self.factories.read().get(tag).cloned()
    }

    pub fn contains(&self, tag: &str) -> bool {
        self.factories.read().contains_key(tag)
    }

    pub fn tags(&self) -> Vec<String> {
        let mut tags: Vec<String> = self.factories.read().keys().cloned().collect();
        tags.sort();
        tags
    }

    pub fn len(&self) -> usize {
        self.factories.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.factories.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use serde::{Deserialize, Serialize};

    use super::*;

    #[derive(Debug, Default, Serialize, Deserialize, PartialEq)]
    struct Ping {
        seq: u32,
    }

    #[derive(Debug, Default, Serialize, Deserialize, PartialEq)]
    struct Pong {
        seq: u32,
    }

    #[test]
    fn resolve_unknown_tag_is_none() {
        let registry = TypeRegistry::new();
        registry.register_default::<Ping>("Ping").expect("register");

        assert!(registry.resolve("Pong").is_none());
        assert!(registry.contains("Ping"));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn empty_tag_is_rejected() {
        let registry = TypeRegistry::new();
        let result = registry.register_default::<Ping>("");

        assert!(matches!(result, Err(Error::EmptyTag)));
        assert!(registry.is_empty());
    }

    #[test]
    fn last_registration_wins() {
        let registry = TypeRegistry::new();
        registry.register_default::<Ping>("X").expect("first");
        registry.register_default::<Pong>("X").expect("second");

        let factory = registry.resolve("X").expect("factory");
        let object = factory();
        assert!(object.is::<Pong>());
        assert_eq!(registry.tags(), vec!["X".to_string()]);
    }
}
