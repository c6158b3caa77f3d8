//! Object pools for per-request wrappers.
//!
//! A [`Pool`] keeps a fixed number of detached wrappers on a LIFO free
//! stack. [`Pool::acquire`] pops one and binds a native handle to it; when
//! the stack is empty a transient wrapper is built instead so bursts never
//! block. [`Pool::release`] resets the wrapper and pushes it back, or drops
//! it if it was transient.
//!
//! Every slot carries a generation counter. Handles ([`Pooled`]) and engine
//! tokens ([`Token`]) capture the generation at acquire time; release bumps
//! it, so anything still holding an old handle sees a dead wrapper instead
//! of the next request's state.
//!
//! ```text
//!            populate()            acquire(native)           release(handle)
//!  [free] ◄──────────── detached ──────────────► [borrowed] ──────────────► [free]
//!                                    │ stack empty                   │ transient
//!                                    └──► transient ─────────────────┴──► dropped
//! ```

use std::cell::{Cell, Ref, RefCell, RefMut};
use std::fmt;
use std::rc::Rc;

use tracing::debug;

use crate::extension::{ExtensionDescriptor, Extensions};
use crate::transport::Token;

const UNREGISTERED: u32 = u32::MAX;

/// A wrapper type that can live in a [`Pool`].
pub trait Poolable: 'static {
    /// Native handle bound while the wrapper is borrowed.
    type Native: ?Sized;

    /// Handle type that extension methods receive.
    type Handle;

    /// Builds a wrapper with no native handle bound.
    fn detached() -> Self;

    /// Binds the native handle for one request.
    fn bind(&mut self, native: Rc<Self::Native>);

    /// Clears the native handle and every per-request field.
    fn reset(&mut self);

    /// Extension state of this wrapper.
    fn extensions_mut(&mut self) -> &mut Extensions<Self::Handle>;
}

struct Slot<T> {
    index: u32,
    generation: Cell<u32>,
    borrowed: Cell<bool>,
    returnable: Cell<bool>,
    value: RefCell<T>,
}

/// A borrowed wrapper.
///
/// Cloning a handle does not clone the wrapper. All clones go stale
/// together when the wrapper is released.
pub struct Pooled<T> {
    slot: Rc<Slot<T>>,
    generation: u32,
}

impl<T> Clone for Pooled<T> {
    fn clone(&self) -> Self {
        Self {
            slot: Rc::clone(&self.slot),
            generation: self.generation,
        }
    }
}

impl<T> Pooled<T> {
    /// Token that identifies this borrow to the engine.
    pub fn token(&self) -> Token {
        Token::new(self.slot.index, self.generation)
    }

    /// `true` until the wrapper is released.
    pub fn is_live(&self) -> bool {
        self.slot.borrowed.get() && self.slot.generation.get() == self.generation
    }

    /// `true` if the wrapper came from the free stack.
    pub fn is_returnable(&self) -> bool {
        self.slot.returnable.get()
    }

    /// Borrows the wrapper if the handle is still live.
    pub fn get(&self) -> Option<Ref<'_, T>> {
        self.is_live().then(|| self.slot.value.borrow())
    }

    /// Mutably borrows the wrapper if the handle is still live.
    pub fn get_mut(&self) -> Option<RefMut<'_, T>> {
        self.is_live().then(|| self.slot.value.borrow_mut())
    }

    /// Runs `f` against the wrapper if the handle is still live.
    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> Option<R> {
        self.get().map(|value| f(&value))
    }

    /// Runs `f` against the wrapper mutably if the handle is still live.
    pub fn with_mut<R>(&self, f: impl FnOnce(&mut T) -> R) -> Option<R> {
        self.get_mut().map(|mut value| f(&mut value))
    }

    /// `true` if both handles refer to the same borrow.
    pub fn same_borrow(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.slot, &other.slot) && self.generation == other.generation
    }
}

impl<T> fmt::Debug for Pooled<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pooled")
            .field("token", &self.token())
            .field("live", &self.is_live())
            .field("returnable", &self.is_returnable())
            .finish()
    }
}

/// Counters describing a pool.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStats {
    /// Pooled wrappers ever constructed. Never exceeds the capacity.
    pub pooled: usize,
    /// Wrappers currently on the free stack.
    pub free: usize,
    /// Wrappers currently borrowed from the pool, pooled or transient.
    pub borrowed: usize,
    /// Total acquisitions.
    pub acquired: u64,
    /// Acquisitions served by a transient wrapper.
    pub transient: u64,
    /// Total releases.
    pub released: u64,
}

struct PoolInner<T: Poolable> {
    capacity: usize,
    slots: Vec<Option<Rc<Slot<T>>>>,
    free: Vec<Rc<Slot<T>>>,
    /// Released transient indices with the generation the next occupant starts at.
    vacant: Vec<(u32, u32)>,
    extension: Option<Rc<ExtensionDescriptor<T::Handle>>>,
    stats: PoolStats,
}

impl<T: Poolable> PoolInner<T> {
    fn new_slot(&mut self, returnable: bool) -> Rc<Slot<T>> {
        let mut value = T::detached();
        if let Some(descriptor) = &self.extension {
            descriptor.bind(value.extensions_mut());
        }
        let (index, generation) = self.vacant.pop().unwrap_or_else(|| {
            self.slots.push(None);
            ((self.slots.len() - 1) as u32, 0)
        });
        let slot = Rc::new(Slot {
            index,
            generation: Cell::new(generation),
            borrowed: Cell::new(false),
            returnable: Cell::new(returnable),
            value: RefCell::new(value),
        });
        self.slots[index as usize] = Some(Rc::clone(&slot));
        slot
    }
}

/// A LIFO pool of wrappers of one kind.
pub struct Pool<T: Poolable> {
    kind: &'static str,
    inner: Rc<RefCell<PoolInner<T>>>,
}

impl<T: Poolable> Clone for Pool<T> {
    fn clone(&self) -> Self {
        Self {
            kind: self.kind,
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<T: Poolable> Pool<T> {
    /// Creates an empty pool. A capacity of 0 disables pooling.
    pub fn new(kind: &'static str, capacity: usize) -> Self {
        Self {
            kind,
            inner: Rc::new(RefCell::new(PoolInner {
                capacity,
                slots: Vec::with_capacity(capacity),
                free: Vec::with_capacity(capacity),
                vacant: Vec::new(),
                extension: None,
                stats: PoolStats::default(),
            })),
        }
    }

    /// Name used in logs and metrics.
    pub fn kind(&self) -> &'static str {
        self.kind
    }

    /// Maximum number of pooled wrappers.
    pub fn capacity(&self) -> usize {
        self.inner.borrow().capacity
    }

    /// Builds detached wrappers until `capacity` pooled wrappers exist.
    ///
    /// Returns the number of wrappers created.
    pub fn populate(&self) -> usize {
        let mut inner = self.inner.borrow_mut();
        let missing = inner.capacity.saturating_sub(inner.stats.pooled);
        for _ in 0..missing {
            let slot = inner.new_slot(true);
            inner.free.push(slot);
        }
        inner.stats.pooled += missing;
        inner.stats.free = inner.free.len();
        if missing > 0 {
            debug!(kind = self.kind, created = missing, "pool populated");
        }
        missing
    }

    /// Borrows a wrapper and binds `native` to it.
    pub fn acquire(&self, native: Rc<T::Native>) -> Pooled<T> {
        let slot = {
            let mut inner = self.inner.borrow_mut();
            inner.stats.acquired += 1;
            inner.stats.borrowed += 1;
            match inner.free.pop() {
                Some(slot) => {
                    inner.stats.free = inner.free.len();
                    slot
                }
                None => {
                    inner.stats.transient += 1;
                    inner.new_slot(false)
                }
            }
        };
        slot.borrowed.set(true);
        slot.value.borrow_mut().bind(native);
        Pooled {
            generation: slot.generation.get(),
            slot,
        }
    }

    /// Returns a wrapper to the pool.
    ///
    /// Returns `false` if the handle was already released.
    pub fn release(&self, handle: &Pooled<T>) -> bool {
        if !handle.is_live() {
            return false;
        }
        let slot = Rc::clone(&handle.slot);
        slot.generation.set(slot.generation.get().wrapping_add(1));
        slot.borrowed.set(false);

        slot.value.borrow_mut().reset();

        let mut inner = self.inner.borrow_mut();
        inner.stats.released += 1;
        if slot.index == UNREGISTERED {
            return true;
        }
        inner.stats.borrowed = inner.stats.borrowed.saturating_sub(1);
        if slot.returnable.get() {
            {
                let mut value = slot.value.borrow_mut();
                match &inner.extension {
                    Some(descriptor) => descriptor.bind(value.extensions_mut()),
                    None => value.extensions_mut().clear(),
                }
            }
            inner.free.push(slot);
            inner.stats.free = inner.free.len();
        } else {
            let index = slot.index;
            inner.slots[index as usize] = None;
            inner.vacant.push((index, slot.generation.get()));
        }
        true
    }

    /// Builds a wrapper outside the pool's bookkeeping and binds `native`.
    ///
    /// The wrapper gets the current extension descriptor but no slot index:
    /// it lives exactly as long as its handles and cannot be resolved from
    /// a token. Used for wrappers that outlive the event that produced them.
    pub fn acquire_unpooled(&self, native: Rc<T::Native>) -> Pooled<T> {
        let mut value = T::detached();
        {
            let mut inner = self.inner.borrow_mut();
            if let Some(descriptor) = &inner.extension {
                descriptor.bind(value.extensions_mut());
            }
            inner.stats.acquired += 1;
            inner.stats.transient += 1;
        }
        value.bind(native);
        let slot = Rc::new(Slot {
            index: UNREGISTERED,
            generation: Cell::new(0),
            borrowed: Cell::new(true),
            returnable: Cell::new(false),
            value: RefCell::new(value),
        });
        Pooled {
            generation: 0,
            slot,
        }
    }

    /// Recovers the handle an engine token was issued for.
    pub fn resolve(&self, token: Token) -> Option<Pooled<T>> {
        let inner = self.inner.borrow();
        let slot = inner.slots.get(token.index() as usize)?.as_ref()?;
        let handle = Pooled {
            slot: Rc::clone(slot),
            generation: token.generation(),
        };
        handle.is_live().then_some(handle)
    }

    /// Installs an extension descriptor, or removes it with `None`.
    ///
    /// Free wrappers are rebound immediately. Borrowed wrappers pick up the
    /// descriptor when they are released; transient wrappers built from now
    /// on get it at construction.
    pub fn set_extension(&self, descriptor: Option<Rc<ExtensionDescriptor<T::Handle>>>) {
        let descriptor = descriptor.filter(|d| !d.is_empty());
        let mut inner = self.inner.borrow_mut();
        for slot in &inner.free {
            let mut value = slot.value.borrow_mut();
            match &descriptor {
                Some(d) => d.bind(value.extensions_mut()),
                None => value.extensions_mut().clear(),
            }
        }
        debug!(
            kind = self.kind,
            rebound = inner.free.len(),
            enabled = descriptor.is_some(),
            "pool extension updated"
        );
        inner.extension = descriptor;
    }

    /// `true` if a non-empty descriptor is installed.
    pub fn has_extension(&self) -> bool {
        self.inner.borrow().extension.is_some()
    }

    /// Current counters.
    pub fn stats(&self) -> PoolStats {
        self.inner.borrow().stats
    }
}

impl<T: Poolable> fmt::Debug for Pool<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pool")
            .field("kind", &self.kind)
            .field("capacity", &self.capacity())
            .field("stats", &self.stats())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    struct FakeNative(u32);

    #[derive(Default)]
    struct Wrapper {
        native: Option<Rc<FakeNative>>,
        on_done: Option<Box<dyn Fn()>>,
        counter: u32,
        ext: Extensions<()>,
    }

    impl Poolable for Wrapper {
        type Native = FakeNative;
        type Handle = ();

        fn detached() -> Self {
            Self::default()
        }

        fn bind(&mut self, native: Rc<FakeNative>) {
            self.native = Some(native);
        }

        fn reset(&mut self) {
            self.native = None;
            self.on_done = None;
            self.counter = 0;
        }

        fn extensions_mut(&mut self) -> &mut Extensions<()> {
            &mut self.ext
        }
    }

    fn native(id: u32) -> Rc<FakeNative> {
        Rc::new(FakeNative(id))
    }

    #[test]
    fn test_populate_is_bounded() {
        let pool = Pool::<Wrapper>::new("test", 3);
        assert_eq!(pool.populate(), 3);
        assert_eq!(pool.populate(), 0);
        assert_eq!(pool.stats().free, 3);
        assert_eq!(pool.stats().pooled, 3);
    }

    #[test]
    fn test_acquire_prefers_pool_then_transient() {
        let pool = Pool::<Wrapper>::new("test", 1);
        pool.populate();

        let a = pool.acquire(native(1));
        let b = pool.acquire(native(2));
        assert!(a.is_returnable());
        assert!(!b.is_returnable());
        assert_eq!(pool.stats().transient, 1);
        assert_eq!(b.with(|w| w.native.as_ref().map(|n| n.0)).flatten(), Some(2));
    }

    #[test]
    fn test_lifo_reuse() {
        let pool = Pool::<Wrapper>::new("test", 2);
        pool.populate();
        let a = pool.acquire(native(1));
        let token = a.token();
        assert!(pool.release(&a));
        let b = pool.acquire(native(2));
        assert_eq!(b.token().index(), token.index());
        assert_ne!(b.token().generation(), token.generation());
    }

    #[test]
    fn test_release_resets_state() {
        let pool = Pool::<Wrapper>::new("test", 1);
        pool.populate();
        let a = pool.acquire(native(1));
        a.with_mut(|w| {
            w.counter = 5;
            w.on_done = Some(Box::new(|| {}));
        });
        pool.release(&a);

        let b = pool.acquire(native(2));
        b.with(|w| {
            assert_eq!(w.counter, 0);
            assert!(w.on_done.is_none());
            assert_eq!(w.native.as_ref().map(|n| n.0), Some(2));
        });
    }

    #[test]
    fn test_stale_handle_is_dead() {
        let pool = Pool::<Wrapper>::new("test", 1);
        pool.populate();
        let a = pool.acquire(native(1));
        let stale = a.clone();
        pool.release(&a);
        let _b = pool.acquire(native(2));

        assert!(!stale.is_live());
        assert!(stale.with(|w| w.counter).is_none());
        assert!(!pool.release(&stale));
    }

    #[test]
    fn test_double_release_ignored() {
        let pool = Pool::<Wrapper>::new("test", 1);
        pool.populate();
        let a = pool.acquire(native(1));
        assert!(pool.release(&a));
        assert!(!pool.release(&a));
        assert_eq!(pool.stats().free, 1);
    }

    #[test]
    fn test_resolve_token() {
        let pool = Pool::<Wrapper>::new("test", 1);
        pool.populate();
        let a = pool.acquire(native(1));
        let token = a.token();
        assert!(pool.resolve(token).unwrap().same_borrow(&a));
        pool.release(&a);
        assert!(pool.resolve(token).is_none());
    }

    #[test]
    fn test_transient_slot_dropped_on_release() {
        let pool = Pool::<Wrapper>::new("test", 0);
        let a = pool.acquire(native(1));
        let token = a.token();
        pool.release(&a);
        assert!(pool.resolve(token).is_none());
        assert_eq!(pool.stats().free, 0);

        let b = pool.acquire(native(2));
        assert_eq!(b.token().index(), token.index());
        assert_ne!(b.token().generation(), token.generation());
        assert!(!b.is_returnable());
        assert!(pool.resolve(token).is_none());
        assert!(pool.resolve(b.token()).unwrap().same_borrow(&b));
    }

    #[test]
    fn test_reused_transient_index_keeps_counting() {
        let pool = Pool::<Wrapper>::new("test", 0);
        let mut stale = Vec::new();
        for i in 0..4 {
            let h = pool.acquire(native(i));
            stale.push(h.token());
            pool.release(&h);
        }
        let live = pool.acquire(native(9));
        for token in stale {
            assert_eq!(token.index(), live.token().index());
            assert!(pool.resolve(token).is_none());
        }
        assert_eq!(live.token().generation(), 4);
    }

    #[test]
    fn test_removing_extension_unbinds_borrowed_wrapper() {
        let pool = Pool::<Wrapper>::new("test", 1);
        pool.populate();
        let mut d = ExtensionDescriptor::<()>::new();
        d.property("hits", 0_u32).method("ping", |_, _| Ok(json!("pong")));
        pool.set_extension(Some(d.freeze()));

        let a = pool.acquire(native(1));
        pool.set_extension(None);
        assert!(a.with(|w| w.ext.method("ping").is_some()).unwrap());
        pool.release(&a);

        let b = pool.acquire(native(2));
        b.with(|w| {
            assert!(w.ext.method("ping").is_none());
            assert_eq!(w.ext.property::<u32>("hits"), None);
        });
    }

    #[test]
    fn test_unpooled_wrapper_is_not_tracked() {
        let pool = Pool::<Wrapper>::new("test", 1);
        pool.populate();

        let kept = pool.acquire_unpooled(native(9));
        assert!(kept.is_live());
        assert!(!kept.is_returnable());
        assert!(pool.resolve(kept.token()).is_none());
        assert_eq!(pool.stats().free, 1);

        assert!(pool.release(&kept));
        assert!(!kept.is_live());
        assert_eq!(pool.stats().free, 1);
    }

    #[test]
    fn test_extension_applied_retroactively() {
        let pool = Pool::<Wrapper>::new("test", 2);
        pool.populate();

        let mut d = ExtensionDescriptor::<()>::new();
        d.property("hits", 0_u32).method("ping", |_, _| Ok(json!("pong")));
        pool.set_extension(Some(d.freeze()));

        let a = pool.acquire(native(1));
        a.with_mut(|w| {
            assert_eq!(w.ext.property::<u32>("hits"), Some(&0));
            assert!(w.ext.method("ping").is_some());
            *w.ext.property_mut::<u32>("hits").unwrap() = 7;
        });
        pool.release(&a);

        let b = pool.acquire(native(2));
        b.with(|w| assert_eq!(w.ext.property::<u32>("hits"), Some(&0)));

        let pool_empty = Pool::<Wrapper>::new("test", 0);
        let mut d = ExtensionDescriptor::<()>::new();
        d.property("hits", 1_u32);
        pool_empty.set_extension(Some(d.freeze()));
        let t = pool_empty.acquire(native(3));
        t.with(|w| assert_eq!(w.ext.property::<u32>("hits"), Some(&1)));
    }

    #[test]
    fn test_empty_extension_is_fast_path() {
        let pool = Pool::<Wrapper>::new("test", 1);
        pool.set_extension(Some(ExtensionDescriptor::new().freeze()));
        assert!(!pool.has_extension());
    }

    proptest! {
        #[test]
        fn prop_pool_never_exceeds_capacity(
            capacity in 0usize..8,
            ops in proptest::collection::vec(any::<bool>(), 1..64),
        ) {
            let pool = Pool::<Wrapper>::new("prop", capacity);
            pool.populate();
            let mut held: Vec<Pooled<Wrapper>> = Vec::new();
            for (i, acquire) in ops.into_iter().enumerate() {
                if acquire || held.is_empty() {
                    let h = pool.acquire(native(i as u32));
                    h.with_mut(|w| w.counter = i as u32 + 1);
                    held.push(h);
                } else {
                    let h = held.remove(0);
                    prop_assert!(pool.release(&h));
                }
                let stats = pool.stats();
                prop_assert!(stats.pooled <= capacity);
                prop_assert_eq!(stats.borrowed, held.len());
                let pooled_borrowed = held.iter().filter(|h| h.is_returnable()).count();
                prop_assert_eq!(stats.free + pooled_borrowed, capacity);
            }
            for h in held.drain(..) {
                pool.release(&h);
            }
            for _ in 0..capacity {
                let h = pool.acquire(native(0));
                prop_assert_eq!(h.with(|w| w.counter), Some(0));
                prop_assert!(h.with(|w| w.on_done.is_none()).unwrap_or(false));
            }
        }
    }
}
