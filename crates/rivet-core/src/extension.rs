//! Capability extensions for pooled wrappers.
//!
//! Applications augment the request, response and connection wrappers with
//! three kinds of additions:
//!
//! - **Properties**: named per-instance slots, reset to a default value every
//!   time a wrapper is recycled.
//! - **Methods**: named callables that receive the wrapper as their first
//!   argument.
//! - **Capabilities**: typed shared objects looked up by type, in the spirit
//!   of a dependency-injection container.
//!
//! An [`ExtensionDescriptor`] collects the additions for one wrapper kind and
//! is applied to an instance's [`Extensions`] container with
//! [`ExtensionDescriptor::bind`]. Binding is idempotent.
//!
//! # Example
//!
//! ```rust
//! use rivet_core::extension::{ExtensionDescriptor, Extensions};
//! use serde_json::json;
//!
//! struct Greeter;
//!
//! let mut descriptor = ExtensionDescriptor::<Greeter>::new();
//! descriptor
//!     .property("visits", 0_u32)
//!     .method("greet", |_this: &Greeter, args| Ok(json!(format!("hi {}", args))));
//! let descriptor = descriptor.freeze();
//!
//! let mut ext = Extensions::default();
//! descriptor.bind(&mut ext);
//! assert_eq!(ext.property::<u32>("visits"), Some(&0));
//! assert!(ext.method("greet").is_some());
//! ```

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};

use serde_json::Value;

/// A bound extension method. Receives the wrapper and a JSON argument.
pub type ExtensionMethod<H> = Rc<dyn Fn(&H, Value) -> anyhow::Result<Value>>;

type PropertyFactory = Rc<dyn Fn() -> Box<dyn Any>>;

static NEXT_DESCRIPTOR_ID: AtomicU64 = AtomicU64::new(1);

/// The properties, methods and capabilities registered for one wrapper kind.
pub struct ExtensionDescriptor<H> {
    id: u64,
    properties: Vec<(String, PropertyFactory)>,
    methods: Vec<(String, ExtensionMethod<H>)>,
    capabilities: Vec<(TypeId, Rc<dyn Any>)>,
}

impl<H> ExtensionDescriptor<H> {
    /// Creates an empty descriptor.
    pub fn new() -> Self {
        Self {
            id: 0,
            properties: Vec::new(),
            methods: Vec::new(),
            capabilities: Vec::new(),
        }
    }

    /// Returns `true` if nothing has been registered.
    pub fn is_empty(&self) -> bool {
        self.properties.is_empty() && self.methods.is_empty() && self.capabilities.is_empty()
    }

    /// Declares a property with its default value.
    ///
    /// Declaring the same name twice replaces the earlier default.
    pub fn property<T>(&mut self, name: impl Into<String>, default: T) -> &mut Self
    where
        T: Clone + 'static,
    {
        let name = name.into();
        let factory: PropertyFactory = Rc::new(move || Box::new(default.clone()));
        self.properties.retain(|(n, _)| *n != name);
        self.properties.push((name, factory));
        self
    }

    /// Declares a method.
    pub fn method<F>(&mut self, name: impl Into<String>, method: F) -> &mut Self
    where
        F: Fn(&H, Value) -> anyhow::Result<Value> + 'static,
    {
        let name = name.into();
        self.methods.retain(|(n, _)| *n != name);
        self.methods.push((name, Rc::new(method)));
        self
    }

    /// Attaches a shared capability, looked up later by its type.
    pub fn capability<C: 'static>(&mut self, capability: C) -> &mut Self {
        let id = TypeId::of::<C>();
        self.capabilities.retain(|(t, _)| *t != id);
        self.capabilities.push((id, Rc::new(capability)));
        self
    }

    /// Names of the declared properties, in declaration order.
    pub fn property_names(&self) -> impl Iterator<Item = &str> {
        self.properties.iter().map(|(n, _)| n.as_str())
    }

    /// Names of the declared methods, in declaration order.
    pub fn method_names(&self) -> impl Iterator<Item = &str> {
        self.methods.iter().map(|(n, _)| n.as_str())
    }

    /// Stamps the descriptor with a fresh identity and shares it.
    ///
    /// Instances remember which descriptor their methods came from, so a
    /// frozen descriptor is bound at most once per instance.
    pub fn freeze(mut self) -> Rc<Self> {
        self.id = NEXT_DESCRIPTOR_ID.fetch_add(1, Ordering::Relaxed);
        Rc::new(self)
    }

    /// Resets every property to its default. Undeclared properties are removed.
    pub fn set_properties(&self, ext: &mut Extensions<H>) {
        ext.properties.clear();
        for (name, factory) in &self.properties {
            ext.properties.insert(name.clone(), factory());
        }
    }

    /// Binds methods and capabilities, unless this descriptor is already bound.
    pub fn bind_methods(&self, ext: &mut Extensions<H>) {
        if self.id != 0 && ext.bound == Some(self.id) {
            return;
        }
        ext.methods.clear();
        ext.capabilities.clear();
        for (name, method) in &self.methods {
            ext.methods.insert(name.clone(), Rc::clone(method));
        }
        for (id, capability) in &self.capabilities {
            ext.capabilities.insert(*id, Rc::clone(capability));
        }
        ext.bound = Some(self.id);
    }

    /// Applies the whole descriptor to an instance.
    pub fn bind(&self, ext: &mut Extensions<H>) {
        self.set_properties(ext);
        self.bind_methods(ext);
    }
}

impl<H> Default for ExtensionDescriptor<H> {
    fn default() -> Self {
        Self::new()
    }
}

impl<H> Clone for ExtensionDescriptor<H> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            properties: self.properties.clone(),
            methods: self.methods.clone(),
            capabilities: self.capabilities.clone(),
        }
    }
}

impl<H> fmt::Debug for ExtensionDescriptor<H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExtensionDescriptor")
            .field("id", &self.id)
            .field("properties", &self.property_names().collect::<Vec<_>>())
            .field("methods", &self.method_names().collect::<Vec<_>>())
            .field("capabilities", &self.capabilities.len())
            .finish()
    }
}

/// Per-instance extension state carried by every pooled wrapper.
pub struct Extensions<H> {
    bound: Option<u64>,
    properties: HashMap<String, Box<dyn Any>>,
    methods: HashMap<String, ExtensionMethod<H>>,
    capabilities: HashMap<TypeId, Rc<dyn Any>>,
}

impl<H> Default for Extensions<H> {
    fn default() -> Self {
        Self {
            bound: None,
            properties: HashMap::new(),
            methods: HashMap::new(),
            capabilities: HashMap::new(),
        }
    }
}

impl<H> Extensions<H> {
    /// Returns `true` if nothing is bound and no property is set.
    pub fn is_empty(&self) -> bool {
        self.properties.is_empty() && self.methods.is_empty() && self.capabilities.is_empty()
    }

    /// Reads a property. Returns `None` if absent or of another type.
    pub fn property<T: 'static>(&self, name: &str) -> Option<&T> {
        self.properties.get(name).and_then(|v| v.downcast_ref::<T>())
    }

    /// Mutable access to a property.
    pub fn property_mut<T: 'static>(&mut self, name: &str) -> Option<&mut T> {
        self.properties
            .get_mut(name)
            .and_then(|v| v.downcast_mut::<T>())
    }

    /// Sets a property, replacing any previous value.
    pub fn set_property<T: 'static>(&mut self, name: impl Into<String>, value: T) {
        self.properties.insert(name.into(), Box::new(value));
    }

    /// Returns `true` if a property with this name exists.
    pub fn has_property(&self, name: &str) -> bool {
        self.properties.contains_key(name)
    }

    /// Looks up a bound method.
    pub fn method(&self, name: &str) -> Option<ExtensionMethod<H>> {
        self.methods.get(name).map(Rc::clone)
    }

    /// Looks up a capability by type.
    pub fn capability<C: 'static>(&self) -> Option<Rc<C>> {
        self.capabilities
            .get(&TypeId::of::<C>())
            .and_then(|c| Rc::clone(c).downcast::<C>().ok())
    }

    /// Drops everything, including bound methods.
    pub fn clear(&mut self) {
        self.bound = None;
        self.properties.clear();
        self.methods.clear();
        self.capabilities.clear();
    }
}

impl<H> fmt::Debug for Extensions<H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Extensions")
            .field("bound", &self.bound)
            .field("properties", &self.properties.keys().collect::<Vec<_>>())
            .field("methods", &self.methods.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Extension access for wrapper handles.
///
/// Implementors only provide [`Extensible::with_extensions`]; the lookups
/// never hold the wrapper borrowed while a method runs, so a method may
/// freely call back into the handle it receives.
pub trait Extensible: Sized {
    /// Runs `f` against the handle's extension state. `None` once released.
    fn with_extensions<R>(&self, f: impl FnOnce(&mut Extensions<Self>) -> R) -> Option<R>;

    /// Reads a property by value.
    fn property<T: Clone + 'static>(&self, name: &str) -> Option<T> {
        self.with_extensions(|ext| ext.property::<T>(name).cloned())
            .flatten()
    }

    /// Sets a property. Ignored once the handle is released.
    fn set_property<T: 'static>(&self, name: &str, value: T) {
        self.with_extensions(|ext| ext.set_property(name, value));
    }

    /// Calls a bound method with this handle as its first argument.
    fn call(&self, name: &str, args: Value) -> anyhow::Result<Value> {
        let method = self
            .with_extensions(|ext| ext.method(name))
            .flatten()
            .ok_or_else(|| anyhow::anyhow!("no extension method named `{name}`"))?;
        method(self, args)
    }

    /// Looks up a shared capability by type.
    fn capability<C: 'static>(&self) -> Option<Rc<C>> {
        self.with_extensions(|ext| ext.capability::<C>()).flatten()
    }
}
