//! Service resolution and controller activation.
//!
//! The dispatcher never constructs controllers itself: it asks an
//! [`Activator`] for an instance of the matched controller's type. Shared
//! services (the converter provider, the argument binder) are looked up
//! through a [`Resolver`] when the request pipeline is composed.

// Internal imports (std, crate)
use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::model::{ControllerInfo, ControllerInstance};
use crate::{Error, Result};

// External imports (alphabetized)
use log::debug;

/// Creates controller instances for dispatch.
pub trait Activator: Send + Sync {
    fn create_instance(&self, controller: &ControllerInfo) -> Result<ControllerInstance>;
}

/// Looks up shared services by type.
pub trait Resolver: Send + Sync {
    fn can_resolve(&self, service: TypeId) -> bool;

    fn resolve(&self, service: TypeId) -> Result<Arc<dyn Any + Send + Sync>>;
}

/// Typed lookup on top of any [`Resolver`].
pub fn resolve<T: Any + Send + Sync>(resolver: &dyn Resolver) -> Result<Arc<T>> {
    resolver
        .resolve(TypeId::of::<T>())?
        .downcast::<T>()
        .map_err(|_| Error::construction(format!("Service {} has the wrong type", std::any::type_name::<T>())))
}

/// Controller serving manifest-declared operations: echoes the bound
/// arguments back.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct EchoController;

type Factory = Arc<dyn Fn() -> Arc<dyn Any + Send + Sync> + Send + Sync>;

struct Registration {
    type_name: &'static str,
    factory: Factory,
}

/// Registry of factories keyed by type; both [`Resolver`] and [`Activator`].
///
/// Registration happens during composition; afterwards the container is only
/// read.
#[derive(Clone)]
pub struct ServiceContainer {
    registrations: HashMap<TypeId, Arc<Registration>>,
}

impl fmt::Debug for ServiceContainer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.registrations.values().map(|r| r.type_name))
            .finish()
    }
}

impl Default for ServiceContainer {
    fn default() -> Self {
        Self::empty().with_transient(|| EchoController)
    }
}

impl ServiceContainer {
    /// A container without even the echo controller.
    pub fn empty() -> Self {
        Self {
            registrations: HashMap::new(),
        }
    }

    /// A new instance per resolution.
    pub fn with_transient<T, F>(mut self, factory: F) -> Self
    where
        T: Any + Send + Sync,
        F: Fn() -> T + Send + Sync + 'static,
    {
        self.register::<T>(Arc::new(move || Arc::new(factory()) as Arc<dyn Any + Send + Sync>));
        self
    }

    /// The same instance for every resolution.
    pub fn with_singleton<T: Any + Send + Sync>(mut self, instance: T) -> Self {
        let instance: Arc<dyn Any + Send + Sync> = Arc::new(instance);
        self.register::<T>(Arc::new(move || instance.clone()));
        self
    }

    fn register<T: Any>(&mut self, factory: Factory) {
        let type_name = std::any::type_name::<T>();
        debug!("registering service {type_name}");
        self.registrations.insert(
            TypeId::of::<T>(),
            Arc::new(Registration { type_name, factory }),
        );
    }
}

impl Resolver for ServiceContainer {
    fn can_resolve(&self, service: TypeId) -> bool {
        self.registrations.contains_key(&service)
    }

    fn resolve(&self, service: TypeId) -> Result<Arc<dyn Any + Send + Sync>> {
        self.registrations
            .get(&service)
            .map(|r| (r.factory)())
            .ok_or_else(|| Error::construction(format!("No service registered for {service:?}")))
    }
}

impl Activator for ServiceContainer {
    fn create_instance(&self, controller: &ControllerInfo) -> Result<ControllerInstance> {
        self.resolve(controller.controller_type()).map_err(|_| {
            Error::construction(format!(
                "Controller {} ({}) is not registered",
                controller.name(),
                controller.type_name()
            ))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ControllerBuilder, TypeCatalog};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Counter(AtomicUsize);

    #[test]
    fn test_echo_controller_is_registered_by_default() -> Result<()> {
        let container = ServiceContainer::default();
        let controller = ControllerBuilder::new("Echo", "/echo").build(&TypeCatalog::new(), false)?;
        let instance = container.create_instance(&controller)?;
        assert!(instance.downcast_ref::<EchoController>().is_some());
        Ok(())
    }

    #[test]
    fn test_unregistered_controller_fails() -> Result<()> {
        let container = ServiceContainer::empty();
        let controller = ControllerBuilder::for_type::<Counter, _, _>("Counter", "/c")
            .build(&TypeCatalog::new(), false)?;
        assert!(container.create_instance(&controller).is_err());
        Ok(())
    }

    #[test]
    fn test_singletons_are_shared() -> Result<()> {
        let container = ServiceContainer::empty().with_singleton(Counter(AtomicUsize::new(0)));
        assert!(container.can_resolve(TypeId::of::<Counter>()));
        resolve::<Counter>(&container)?.0.fetch_add(1, Ordering::SeqCst);
        assert_eq!(resolve::<Counter>(&container)?.0.load(Ordering::SeqCst), 1);
        assert!(resolve::<EchoController>(&container).is_err());
        Ok(())
    }
}
