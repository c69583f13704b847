// Capability registry: one binding per service trait, held by an explicit context
use crate::resolver::{DefaultResolver, ResourceResolver};
use crate::xml::{QuickXmlEngine, SchemaReader, XmlEngine, XsdDeclarationReader};
use crate::{Error, Result};
use parking_lot::RwLock;
use std::any::{type_name, Any, TypeId};
use std::collections::HashMap;
use std::sync::Arc;

type Factory<T> = Arc<dyn Fn() -> Arc<T> + Send + Sync>;

struct Binding {
    type_name: &'static str,
    factory: Box<dyn Any + Send + Sync>,
}

/// Default bindings installed by [`ServiceRegistry::with_defaults`].
const DEFAULT_BINDINGS: &[(&str, fn(&ServiceRegistry))] = &[
    ("xml engine", bind_xml_engine),
    ("schema reader", bind_schema_reader),
    ("resource resolver", bind_resource_resolver),
];

fn bind_xml_engine(registry: &ServiceRegistry) {
    registry.register::<dyn XmlEngine, _>(|| Arc::new(QuickXmlEngine::new()) as Arc<dyn XmlEngine>);
}

fn bind_schema_reader(registry: &ServiceRegistry) {
    registry.register::<dyn SchemaReader, _>(|| Arc::new(XsdDeclarationReader) as Arc<dyn SchemaReader>);
}

fn bind_resource_resolver(registry: &ServiceRegistry) {
    registry.register::<dyn ResourceResolver, _>(|| {
        Arc::new(DefaultResolver::new()) as Arc<dyn ResourceResolver>
    });
}

/// Maps each capability trait (e.g. `dyn ResourceResolver`) to the factory
/// producing its implementation.
///
/// Loads resolve their services once when they start, so rebinding a
/// capability only affects loads created afterwards.
#[derive(Default)]
pub struct ServiceRegistry {
    bindings: RwLock<HashMap<TypeId, Binding>>,
}

impl ServiceRegistry {
    /// An empty registry; every capability must be registered explicitly.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_defaults() -> Self {
        let registry = Self::new();
        for (capability, bind) in DEFAULT_BINDINGS {
            tracing::trace!("binding default {}", capability);
            bind(&registry);
        }
        registry
    }

    /// Binds `T` to `factory`, replacing any previous binding.
    pub fn register<T, F>(&self, factory: F)
    where
        T: ?Sized + Send + Sync + 'static,
        F: Fn() -> Arc<T> + Send + Sync + 'static,
    {
        let factory: Factory<T> = Arc::new(factory);
        let previous = self.bindings.write().insert(
            TypeId::of::<T>(),
            Binding {
                type_name: type_name::<T>(),
                factory: Box::new(factory),
            },
        );
        if let Some(previous) = previous {
            tracing::debug!("rebound {}", previous.type_name);
        }
    }

    /// Binds `T` to a shared instance handed out on every resolve.
    pub fn register_instance<T>(&self, instance: Arc<T>)
    where
        T: ?Sized + Send + Sync + 'static,
    {
        self.register::<T, _>(move || Arc::clone(&instance));
    }

    pub fn resolve<T>(&self) -> Result<Arc<T>>
    where
        T: ?Sized + Send + Sync + 'static,
    {
        let factory = {
            let bindings = self.bindings.read();
            bindings
                .get(&TypeId::of::<T>())
                .and_then(|b| b.factory.downcast_ref::<Factory<T>>())
                .cloned()
                .ok_or(Error::NotRegistered(type_name::<T>()))?
        };
        Ok(factory())
    }

    pub fn contains<T>(&self) -> bool
    where
        T: ?Sized + 'static,
    {
        self.bindings.read().contains_key(&TypeId::of::<T>())
    }

    pub fn len(&self) -> usize {
        self.bindings.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    trait Greeter: Send + Sync {
        fn greet(&self) -> &'static str;
    }

    struct English;
    impl Greeter for English {
        fn greet(&self) -> &'static str {
            "hello"
        }
    }

    struct Dutch;
    impl Greeter for Dutch {
        fn greet(&self) -> &'static str {
            "hallo"
        }
    }

    #[test]
    fn test_missing_binding_is_not_registered() {
        let registry = ServiceRegistry::new();
        assert!(matches!(
            registry.resolve::<dyn Greeter>(),
            Err(Error::NotRegistered(_))
        ));
    }

    #[test]
    fn test_defaults_cover_core_capabilities() {
        let registry = ServiceRegistry::with_defaults();
        assert!(registry.resolve::<dyn XmlEngine>().is_ok());
        assert!(registry.resolve::<dyn SchemaReader>().is_ok());
        assert!(registry.resolve::<dyn ResourceResolver>().is_ok());
        assert_eq!(registry.len(), DEFAULT_BINDINGS.len());
    }

    #[test]
    fn test_reregistration_replaces_binding() {
        let registry = ServiceRegistry::new();
        registry.register::<dyn Greeter, _>(|| Arc::new(English) as Arc<dyn Greeter>);
        let before = registry.resolve::<dyn Greeter>().unwrap();

        registry.register::<dyn Greeter, _>(|| Arc::new(Dutch) as Arc<dyn Greeter>);
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.resolve::<dyn Greeter>().unwrap().greet(), "hallo");
        // Already-resolved instances keep their binding
        assert_eq!(before.greet(), "hello");
    }

    #[test]
    fn test_factory_yields_fresh_instances() {
        let created = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&created);
        let registry = ServiceRegistry::new();
        registry.register::<dyn Greeter, _>(move || {
            counter.fetch_add(1, Ordering::SeqCst);
            Arc::new(English) as Arc<dyn Greeter>
        });

        let a = registry.resolve::<dyn Greeter>().unwrap();
        let b = registry.resolve::<dyn Greeter>().unwrap();
        assert!(!Arc::ptr_eq(&a, &b));
        assert_eq!(created.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_instance_binding_is_shared() {
        let registry = ServiceRegistry::new();
        registry.register_instance::<dyn Greeter>(Arc::new(English));
        let a = registry.resolve::<dyn Greeter>().unwrap();
        let b = registry.resolve::<dyn Greeter>().unwrap();
        assert!(Arc::ptr_eq(&a, &b));
    }
}
