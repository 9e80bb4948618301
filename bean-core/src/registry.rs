use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::debug;

use crate::{BeanError, BeanResult, InvocationContext};

/// Resolves a live bean instance for a bean type.
///
/// The dependency-injection layer implements this; the engines only call it.
pub trait BeanLocator<T: ?Sized>: Send + Sync {
    fn lookup(&self, bean_type: &str, ctx: &InvocationContext) -> BeanResult<Arc<T>>;
}

/// A simple registry that maps bean type names to shared instances.
///
/// Useful for embedding and tests; session ids are ignored, every lookup
/// returns the same instance.
pub struct BeanRegistry<T: ?Sized> {
    beans: RwLock<HashMap<String, Arc<T>>>,
}

impl<T: ?Sized> BeanRegistry<T> {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            beans: RwLock::new(HashMap::new()),
        }
    }

    /// Register a bean under a given type name, replacing any previous one.
    pub fn register<S>(&self, bean_type: S, bean: Arc<T>)
    where
        S: Into<String>,
    {
        let bean_type = bean_type.into();
        if self.beans.write().insert(bean_type.clone(), bean).is_some() {
            debug!(%bean_type, "Bean replaced");
        }
    }

    /// Look up a bean by type name.
    pub fn get(&self, bean_type: &str) -> Option<Arc<T>> {
        self.beans.read().get(bean_type).cloned()
    }

    pub fn contains(&self, bean_type: &str) -> bool {
        self.beans.read().contains_key(bean_type)
    }
}

impl<T: ?Sized> Default for BeanRegistry<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: ?Sized + Send + Sync> BeanLocator<T> for BeanRegistry<T> {
    fn lookup(&self, bean_type: &str, _ctx: &InvocationContext) -> BeanResult<Arc<T>> {
        self.get(bean_type).ok_or_else(|| {
            BeanError::not_found(format!("bean '{}' is not registered", bean_type)).into_anyhow()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ErrorKind;

    trait Greeter: Send + Sync {
        fn greet(&self) -> String;
    }

    struct English;

    impl Greeter for English {
        fn greet(&self) -> String {
            "hello".to_string()
        }
    }

    #[test]
    fn lookup_returns_registered_bean() {
        let registry: BeanRegistry<dyn Greeter> = BeanRegistry::new();
        registry.register("Greeter", Arc::new(English));

        let bean = registry
            .lookup("Greeter", &InvocationContext::new("s1"))
            .unwrap();
        assert_eq!(bean.greet(), "hello");
    }

    #[test]
    fn lookup_of_unknown_bean_is_not_found() {
        let registry: BeanRegistry<dyn Greeter> = BeanRegistry::new();
        let err = registry
            .lookup("Missing", &InvocationContext::detached())
            .err()
            .unwrap();
        let bean = BeanError::from_anyhow(&err).unwrap();
        assert_eq!(bean.kind, ErrorKind::NotFound);
    }
}
