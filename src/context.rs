//! Process-wide service registry shared by sessions and handlers.
//!
//! `ServiceContext` stores one value per concrete type, keyed by `TypeId`.
//! Values live in `Arc<dyn Any + Send + Sync>` so lookups hand out cheap
//! clones. The server owns one context and passes it explicitly to the
//! session factory and to every handler invocation; nothing resolves services
//! implicitly.

use std::{
    any::{Any, TypeId},
    fmt,
    sync::Arc,
};

use dashmap::DashMap;

/// Concurrent type-keyed service registry.
///
/// # Examples
///
/// ```
/// use wirelink::context::ServiceContext;
///
/// let services = ServiceContext::new();
/// services.register(42u32);
/// assert_eq!(*services.get::<u32>().expect("registered"), 42);
/// ```
#[derive(Default)]
pub struct ServiceContext {
    services: DashMap<TypeId, Arc<dyn Any + Send + Sync>>,
}

impl ServiceContext {
    /// Create an empty context.
    #[must_use]
    pub fn new() -> Self { Self::default() }

    /// Register `service`, replacing any existing value of the same type.
    pub fn register<T>(&self, service: T)
    where
        T: Send + Sync + 'static,
    {
        self.register_arc(Arc::new(service));
    }

    /// Register an already shared service.
    pub fn register_arc<T>(&self, service: Arc<T>)
    where
        T: Send + Sync + 'static,
    {
        self.services
            .insert(TypeId::of::<T>(), service as Arc<dyn Any + Send + Sync>);
    }

    /// Retrieve the service of type `T`, if registered.
    #[must_use]
    pub fn get<T>(&self) -> Option<Arc<T>>
    where
        T: Send + Sync + 'static,
    {
        self.services
            .get(&TypeId::of::<T>())
            .and_then(|entry| Arc::clone(entry.value()).downcast::<T>().ok())
    }

    /// Retrieve the service of type `T`, constructing and registering it with
    /// `init` on a miss.
    ///
    /// `init` runs without any lock held, so it may resolve other services
    /// from this context. Concurrent callers racing on the same type may each
    /// run `init`, but all observe the instance registered first.
    pub fn get_or_insert_with<T, F>(&self, init: F) -> Arc<T>
    where
        T: Send + Sync + 'static,
        F: FnOnce() -> T,
    {
        if let Some(service) = self.get::<T>() {
            return service;
        }
        let candidate = Arc::new(init()) as Arc<dyn Any + Send + Sync>;
        let entry = self.services.entry(TypeId::of::<T>()).or_insert(candidate);
        match Arc::clone(entry.value()).downcast::<T>() {
            Ok(service) => service,
            Err(_) => unreachable!("services are keyed by their own TypeId"),
        }
    }

    /// Returns `true` when a service of type `T` is registered.
    #[must_use]
    pub fn contains<T: 'static>(&self) -> bool { self.services.contains_key(&TypeId::of::<T>()) }

    /// Number of registered services.
    #[must_use]
    pub fn len(&self) -> usize { self.services.len() }

    /// Returns `true` if no services are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool { self.services.is_empty() }
}

impl fmt::Debug for ServiceContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceContext")
            .field("services", &self.services.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::{
        sync::{Arc, mpsc},
        thread,
        time::Duration,
    };

    use super::ServiceContext;

    #[derive(Debug, PartialEq)]
    struct Greeter {
        greeting: &'static str,
    }

    fn assert_send_sync<T: Send + Sync>() {}

    #[test]
    fn register_and_get_multiple_types() {
        let services = ServiceContext::new();
        services.register(12u32);
        services.register("hello".to_string());
        services.register(Greeter { greeting: "hi" });

        assert_eq!(*services.get::<u32>().expect("u32 present"), 12);
        assert_eq!(
            services.get::<String>().expect("String present").as_str(),
            "hello"
        );
        assert_eq!(
            *services.get::<Greeter>().expect("Greeter present"),
            Greeter { greeting: "hi" }
        );
        assert_eq!(services.len(), 3);
    }

    #[test]
    fn register_overwrites_existing_value() {
        let services = ServiceContext::new();
        services.register(10u32);
        services.register(20u32);
        assert_eq!(*services.get::<u32>().expect("u32 present"), 20);
    }

    #[test]
    fn missing_type_returns_none() {
        let services = ServiceContext::new();
        assert!(services.get::<u32>().is_none());
        assert!(!services.contains::<u32>());
    }

    #[test]
    fn get_or_insert_with_constructs_once() {
        let services = Arc::new(ServiceContext::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let services = Arc::clone(&services);
                thread::spawn(move || services.get_or_insert_with(|| Greeter { greeting: "once" }))
            })
            .collect();
        let instances: Vec<_> = handles
            .into_iter()
            .map(|h| h.join().expect("thread panicked"))
            .collect();

        let first = instances.first().expect("at least one instance");
        assert!(instances.iter().all(|i| Arc::ptr_eq(i, first)));
    }

    #[test]
    fn get_or_insert_with_may_resolve_other_services() {
        let services = Arc::new(ServiceContext::new());
        let (tx, rx) = mpsc::channel();
        let worker = Arc::clone(&services);
        thread::spawn(move || {
            let greeter = worker.get_or_insert_with(|| Greeter {
                greeting: if *worker.get_or_insert_with(|| 7u32) == 7 {
                    "resolved"
                } else {
                    "missing"
                },
            });
            let _ = tx.send(greeter.greeting);
        });

        let greeting = rx
            .recv_timeout(Duration::from_secs(1))
            .expect("nested resolution deadlocked");
        assert_eq!(greeting, "resolved");
        assert!(services.contains::<u32>());
    }

    #[test]
    fn context_is_send_and_sync() { assert_send_sync::<ServiceContext>(); }
}
