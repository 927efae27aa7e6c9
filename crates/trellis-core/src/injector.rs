// crates/trellis-core/src/injector.rs
// ============================================================================
// Module: Injector
// Description: Opaque type-keyed handle for resolving application services.
// Purpose: Let applications and tests look up shared instances by type.
// Dependencies: std
// ============================================================================

//! ## Overview
//! [`Bindings`] collect shared instances keyed by type, [`Module`]s contribute
//! bindings, and a built [`Injector`] resolves them. Later bindings for the same
//! type replace earlier ones, which is how override modules substitute test
//! doubles for application services. Trait objects are bound with
//! [`Bindings::bind_shared`] and resolved as `Arc<dyn Trait>`.

use std::any::Any;
use std::any::TypeId;
use std::any::type_name;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use thiserror::Error;

/// Type-erased binding entry.
struct Binding {
    /// Name of the bound type, for diagnostics.
    type_name: &'static str,
    /// Boxed `Arc<T>` for the bound type `T`.
    instance: Box<dyn Any + Send + Sync>,
}

/// Mutable collection of bindings used while configuring an application.
#[derive(Default)]
pub struct Bindings {
    /// Bindings keyed by the bound type.
    entries: HashMap<TypeId, Binding>,
}

impl Bindings {
    /// Creates an empty binding set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Binds an owned instance, replacing any earlier binding for `T`.
    pub fn bind<T: Send + Sync + 'static>(&mut self, instance: T) -> &mut Self {
        self.bind_shared(Arc::new(instance))
    }

    /// Binds a shared instance, replacing any earlier binding for `T`.
    pub fn bind_shared<T: ?Sized + Send + Sync + 'static>(&mut self, instance: Arc<T>) -> &mut Self {
        self.entries.insert(
            TypeId::of::<T>(),
            Binding {
                type_name: type_name::<T>(),
                instance: Box::new(instance),
            },
        );
        self
    }

    /// Applies a module on top of the current bindings.
    pub fn install(&mut self, module: &dyn Module) -> &mut Self {
        module.configure(self);
        self
    }

    /// Returns true when `T` is bound.
    #[must_use]
    pub fn contains<T: ?Sized + 'static>(&self) -> bool {
        self.entries.contains_key(&TypeId::of::<T>())
    }

    /// Freezes the bindings into an injector.
    #[must_use]
    pub fn build(self) -> Injector {
        Injector {
            entries: Arc::new(self.entries),
        }
    }
}

/// Source of bindings, typically an application or a test override.
pub trait Module: Send + Sync {
    /// Adds bindings.
    fn configure(&self, bindings: &mut Bindings);
}

impl<F> Module for F
where
    F: Fn(&mut Bindings) + Send + Sync,
{
    fn configure(&self, bindings: &mut Bindings) {
        self(bindings);
    }
}

/// Immutable handle resolving bound instances by type.
#[derive(Clone, Default)]
pub struct Injector {
    /// Frozen bindings shared between clones.
    entries: Arc<HashMap<TypeId, Binding>>,
}

impl Injector {
    /// Returns the instance bound for `T`, if any.
    #[must_use]
    pub fn get<T: ?Sized + Send + Sync + 'static>(&self) -> Option<Arc<T>> {
        self.entries
            .get(&TypeId::of::<T>())
            .and_then(|binding| binding.instance.downcast_ref::<Arc<T>>())
            .cloned()
    }

    /// Returns the instance bound for `T` or an error naming the type.
    ///
    /// # Errors
    ///
    /// Returns [`InjectorError::Unbound`] when nothing is bound for `T`.
    pub fn require<T: ?Sized + Send + Sync + 'static>(&self) -> Result<Arc<T>, InjectorError> {
        self.get::<T>().ok_or(InjectorError::Unbound(type_name::<T>()))
    }

    /// Returns the number of bindings.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true when nothing is bound.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl fmt::Debug for Injector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<&str> = self.entries.values().map(|binding| binding.type_name).collect();
        names.sort_unstable();
        f.debug_struct("Injector").field("bindings", &names).finish()
    }
}

/// Injector lookup errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InjectorError {
    /// No binding exists for the requested type.
    #[error("no binding for {0}")]
    Unbound(&'static str),
}
