//! Start-up registration of components.
//!
//! The registry is filled once, before any environment exists, and is
//! immutable afterwards. Each registration records the concrete component
//! type, its lifetime, how to obtain an instance, and the interface
//! capabilities it provides. Environments are stamped out of the registry:
//! singleton registrations contribute their one shared instance, transient
//! registrations build a fresh instance per environment.

use std::any::{Any, TypeId};
use std::fmt;
use std::sync::Arc;

use testrig_common::error::{Result, TestRigError};
use testrig_common::types::Lifetime;

use crate::component::Component;
use crate::environment::Environment;
use crate::lifetime::{DecoratedComponent, SingletonComponent, TransientComponent};

type AnyInstance = Arc<dyn Any + Send + Sync>;
type Caster = Arc<dyn Fn(&AnyInstance) -> Option<Box<dyn Any + Send + Sync>> + Send + Sync>;
type Factory = Arc<dyn Fn() -> (AnyInstance, Arc<dyn Component>) + Send + Sync>;

/// An interface a registered component can be looked up by.
#[derive(Clone)]
pub(crate) struct Capability {
    pub(crate) interface: TypeId,
    pub(crate) interface_name: &'static str,
    pub(crate) cast: Caster,
}

enum Source {
    Shared {
        instance: AnyInstance,
        decorated: Arc<SingletonComponent>,
    },
    PerEnvironment(Factory),
}

struct Registration {
    type_id: TypeId,
    type_name: &'static str,
    source: Source,
    capabilities: Vec<Capability>,
}

impl Registration {
    const fn lifetime(&self) -> Lifetime {
        match self.source {
            Source::Shared { .. } => Lifetime::Singleton,
            Source::PerEnvironment(_) => Lifetime::Transient,
        }
    }
}

/// One component as held by an environment.
pub(crate) struct Slot {
    pub(crate) type_id: TypeId,
    pub(crate) type_name: &'static str,
    pub(crate) instance: AnyInstance,
    pub(crate) decorated: Arc<dyn DecoratedComponent>,
    pub(crate) capabilities: Arc<[Capability]>,
}

/// Ordered set of component registrations.
#[derive(Default)]
pub struct ComponentRegistry {
    registrations: Vec<Registration>,
}

impl ComponentRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `instance` as a singleton shared by every environment.
    ///
    /// # Errors
    ///
    /// Returns [`TestRigError::DuplicateComponent`] if `T` is already
    /// registered.
    pub fn add_singleton<T: Component>(&mut self, instance: T) -> Result<ComponentRegistration<'_, T>> {
        self.ensure_unregistered::<T>()?;
        let instance = Arc::new(instance);
        let type_name = std::any::type_name::<T>();
        let any: AnyInstance = instance.clone();
        let decorated = Arc::new(SingletonComponent::new(instance, type_name));
        Ok(self.push::<T>(Source::Shared {
            instance: any,
            decorated,
        }))
    }

    /// Registers `T` as transient; `factory` builds one instance per
    /// environment.
    ///
    /// # Errors
    ///
    /// Returns [`TestRigError::DuplicateComponent`] if `T` is already
    /// registered.
    pub fn add_transient<T, F>(&mut self, factory: F) -> Result<ComponentRegistration<'_, T>>
    where
        T: Component,
        F: Fn() -> T + Send + Sync + 'static,
    {
        self.ensure_unregistered::<T>()?;
        let factory: Factory = Arc::new(move || {
            let instance = Arc::new(factory());
            let any: AnyInstance = instance.clone();
            (any, instance as Arc<dyn Component>)
        });
        Ok(self.push::<T>(Source::PerEnvironment(factory)))
    }

    /// Registers `T` as transient, built with [`Default`].
    ///
    /// # Errors
    ///
    /// Returns [`TestRigError::DuplicateComponent`] if `T` is already
    /// registered.
    pub fn add<T: Component + Default>(&mut self) -> Result<ComponentRegistration<'_, T>> {
        self.add_transient(T::default)
    }

    fn ensure_unregistered<T: Component>(&self) -> Result<()> {
        let type_id = TypeId::of::<T>();
        if self.registrations.iter().any(|r| r.type_id == type_id) {
            return Err(TestRigError::DuplicateComponent {
                component: std::any::type_name::<T>(),
            });
        }
        Ok(())
    }

    fn push<T: Component>(&mut self, source: Source) -> ComponentRegistration<'_, T> {
        let type_name = std::any::type_name::<T>();
        tracing::debug!(component = type_name, "component registered");
        self.registrations.push(Registration {
            type_id: TypeId::of::<T>(),
            type_name,
            source,
            capabilities: Vec::new(),
        });
        let index = self.registrations.len() - 1;
        ComponentRegistration {
            registration: &mut self.registrations[index],
            _component: std::marker::PhantomData,
        }
    }

    /// Returns the number of registered components.
    #[must_use]
    pub fn len(&self) -> usize {
        self.registrations.len()
    }

    /// Returns whether nothing has been registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.registrations.is_empty()
    }

    /// Returns `(type name, lifetime)` for every registration, in order.
    pub fn describe(&self) -> impl Iterator<Item = (&'static str, Lifetime)> + '_ {
        self.registrations.iter().map(|r| (r.type_name, r.lifetime()))
    }

    /// Returns the shared singleton wrappers in registration order.
    #[must_use]
    pub fn singletons(&self) -> Vec<Arc<SingletonComponent>> {
        self.registrations
            .iter()
            .filter_map(|r| match &r.source {
                Source::Shared { decorated, .. } => Some(Arc::clone(decorated)),
                Source::PerEnvironment(_) => None,
            })
            .collect()
    }

    /// Builds a new, uninitialized environment from the registrations.
    #[must_use]
    pub fn create_environment(&self) -> Environment {
        let slots = self
            .registrations
            .iter()
            .map(|r| {
                let (instance, decorated): (AnyInstance, Arc<dyn DecoratedComponent>) =
                    match &r.source {
                        Source::Shared {
                            instance,
                            decorated,
                        } => (
                            Arc::clone(instance),
                            Arc::clone(decorated) as Arc<dyn DecoratedComponent>,
                        ),
                        Source::PerEnvironment(factory) => {
                            let (instance, component) = factory();
                            (
                                instance,
                                Arc::new(TransientComponent::new(component, r.type_name))
                                    as Arc<dyn DecoratedComponent>,
                            )
                        }
                    };
                Slot {
                    type_id: r.type_id,
                    type_name: r.type_name,
                    instance,
                    decorated,
                    capabilities: r.capabilities.clone().into(),
                }
            })
            .collect();
        Environment::new(slots)
    }
}

impl fmt::Debug for ComponentRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.describe()).finish()
    }
}

/// Handle returned by a registration, used to declare capabilities.
pub struct ComponentRegistration<'a, T> {
    registration: &'a mut Registration,
    _component: std::marker::PhantomData<fn() -> T>,
}

impl<T: Component> ComponentRegistration<'_, T> {
    /// Declares that the component can be looked up as `I`.
    ///
    /// `cast` performs the unsizing coercion, usually `|c| c`.
    #[must_use]
    pub fn provides<I>(self, cast: fn(Arc<T>) -> Arc<I>) -> Self
    where
        I: ?Sized + Send + Sync + 'static,
    {
        let caster: Caster = Arc::new(move |instance: &AnyInstance| {
            let concrete = Arc::clone(instance).downcast::<T>().ok()?;
            Some(Box::new(cast(concrete)) as Box<dyn Any + Send + Sync>)
        });
        self.registration.capabilities.push(Capability {
            interface: TypeId::of::<I>(),
            interface_name: std::any::type_name::<I>(),
            cast: caster,
        });
        self
    }
}
