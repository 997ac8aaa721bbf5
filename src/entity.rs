//! Densely numbered entity references used throughout the IR and type system.
//!
//! Every handle the core hands out — a `Register`, a `Block` id, a flyweight
//! index into a type-category table — is a thin wrapper around a `u32`
//! index into some side table, rather than a pointer or a `Rc`. This keeps
//! handles `Copy`, keeps comparisons cheap, and keeps the side tables free to
//! reallocate without invalidating anything that only ever holds an index.

use std::fmt;
use std::marker::PhantomData;
use std::ops::{Index, IndexMut};

/// A type that can be used as a key into a [`PrimaryMap`]/[`SecondaryMap`].
///
/// Implementors are plain `u32` newtypes; see [`entity_impl`].
pub trait EntityRef: Copy + Eq {
    fn new(index: usize) -> Self;
    fn index(self) -> usize;
}

/// Declares the boilerplate `EntityRef`/`Display`/ordering impls for a
/// `struct Foo(u32);` newtype, the way `cranelift_entity::entity_impl!` does
/// for `Block`, `Value`, `Inst`, and friends.
macro_rules! entity_impl {
    ($name:ident, $display:expr) => {
        impl $crate::entity::EntityRef for $name {
            fn new(index: usize) -> Self {
                debug_assert!(index < (u32::MAX as usize));
                $name(index as u32)
            }

            fn index(self) -> usize {
                self.0 as usize
            }
        }

        impl $name {
            /// Create a new reference from its raw numeric representation.
            pub fn from_u32(n: u32) -> Self {
                $name(n)
            }

            /// The raw numeric representation of this reference.
            pub fn as_u32(self) -> u32 {
                self.0
            }
        }

        impl ::std::fmt::Display for $name {
            fn fmt(&self, f: &mut ::std::fmt::Formatter) -> ::std::fmt::Result {
                write!(f, concat!($display, "{}"), self.0)
            }
        }

        impl ::std::fmt::Debug for $name {
            fn fmt(&self, f: &mut ::std::fmt::Formatter) -> ::std::fmt::Result {
                ::std::fmt::Display::fmt(self, f)
            }
        }
    };
}

pub(crate) use entity_impl;

/// A mapping `K -> V` that also allocates new keys (`push`), for the dense
/// entity spaces the core allocates during emission (registers, blocks,
/// flyweight entries).
#[derive(Debug, Clone)]
pub struct PrimaryMap<K: EntityRef, V> {
    elems: Vec<V>,
    unused: PhantomData<K>,
}

impl<K: EntityRef, V> PrimaryMap<K, V> {
    pub fn new() -> Self {
        Self { elems: Vec::new(), unused: PhantomData }
    }

    pub fn push(&mut self, value: V) -> K {
        let key = K::new(self.elems.len());
        self.elems.push(value);
        key
    }

    pub fn len(&self) -> usize {
        self.elems.len()
    }

    pub fn is_empty(&self) -> bool {
        self.elems.is_empty()
    }

    pub fn get(&self, k: K) -> Option<&V> {
        self.elems.get(k.index())
    }

    pub fn get_mut(&mut self, k: K) -> Option<&mut V> {
        self.elems.get_mut(k.index())
    }

    pub fn iter(&self) -> impl Iterator<Item = (K, &V)> {
        self.elems.iter().enumerate().map(|(i, v)| (K::new(i), v))
    }

    pub fn keys(&self) -> impl Iterator<Item = K> + '_ {
        (0..self.elems.len()).map(K::new)
    }

    pub fn values(&self) -> impl Iterator<Item = &V> {
        self.elems.iter()
    }

    pub fn values_mut(&mut self) -> impl Iterator<Item = &mut V> {
        self.elems.iter_mut()
    }
}

impl<K: EntityRef, V> Default for PrimaryMap<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: EntityRef, V> Index<K> for PrimaryMap<K, V> {
    type Output = V;
    fn index(&self, k: K) -> &V {
        &self.elems[k.index()]
    }
}

impl<K: EntityRef, V> IndexMut<K> for PrimaryMap<K, V> {
    fn index_mut(&mut self, k: K) -> &mut V {
        &mut self.elems[k.index()]
    }
}

/// A mapping `K -> V` over the same dense index space as some [`PrimaryMap`],
/// used to attach secondary information (e.g. per-block predecessor sets,
/// per-register byte offsets) without touching the primary allocation.
///
/// Unlike `PrimaryMap`, a `SecondaryMap` can't allocate new keys; it behaves
/// as though every key already maps to a default value and grows lazily on
/// write.
#[derive(Debug, Clone)]
pub struct SecondaryMap<K: EntityRef, V: Clone> {
    elems: Vec<V>,
    default: V,
    unused: PhantomData<K>,
}

impl<K: EntityRef, V: Clone + Default> SecondaryMap<K, V> {
    pub fn new() -> Self {
        Self::with_default(V::default())
    }
}

impl<K: EntityRef, V: Clone + Default> Default for SecondaryMap<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: EntityRef, V: Clone> SecondaryMap<K, V> {
    pub fn with_default(default: V) -> Self {
        Self { elems: Vec::new(), default, unused: PhantomData }
    }

    pub fn get(&self, k: K) -> Option<&V> {
        self.elems.get(k.index())
    }

    pub fn resize(&mut self, n: usize) {
        if n > self.elems.len() {
            self.elems.resize(n, self.default.clone());
        }
    }

    pub fn clear(&mut self) {
        self.elems.clear();
    }
}

impl<K: EntityRef, V: Clone> Index<K> for SecondaryMap<K, V> {
    type Output = V;
    fn index(&self, k: K) -> &V {
        self.elems.get(k.index()).unwrap_or(&self.default)
    }
}

impl<K: EntityRef, V: Clone> IndexMut<K> for SecondaryMap<K, V> {
    fn index_mut(&mut self, k: K) -> &mut V {
        let i = k.index();
        if i >= self.elems.len() {
            self.resize(i + 1);
        }
        &mut self.elems[i]
    }
}

/// A flyweight interner: canonical, idempotent `key -> handle` assignment
/// with handle -> key lookup for decomposition. Grounded on
/// `cranelift_entity::PrimaryMap` plus a `hashbrown` reverse index, the same
/// shape as `base::flyweight_set` in the original Icarus implementation.
#[derive(Debug, Clone)]
pub struct FlyweightSet<K: EntityRef, V: Eq + std::hash::Hash + Clone> {
    forward: PrimaryMap<K, V>,
    reverse: hashbrown::HashMap<V, K>,
}

impl<K: EntityRef, V: Eq + std::hash::Hash + Clone> FlyweightSet<K, V> {
    pub fn new() -> Self {
        Self { forward: PrimaryMap::new(), reverse: hashbrown::HashMap::new() }
    }

    /// Returns the canonical handle for `key`, interning it if this is the
    /// first time it has been seen. Idempotent: equal keys always yield
    /// equal handles, per the flyweight-equality invariant in `spec.md` §3.
    pub fn intern(&mut self, key: V) -> K {
        if let Some(existing) = self.reverse.get(&key) {
            return *existing;
        }
        let handle = self.forward.push(key.clone());
        self.reverse.insert(key, handle);
        handle
    }

    pub fn decompose(&self, handle: K) -> &V {
        &self.forward[handle]
    }

    pub fn len(&self) -> usize {
        self.forward.len()
    }

    pub fn is_empty(&self) -> bool {
        self.forward.is_empty()
    }
}

impl<K: EntityRef, V: Eq + std::hash::Hash + Clone> Default for FlyweightSet<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: EntityRef + fmt::Display, V: Eq + std::hash::Hash + Clone> FlyweightSet<K, V> {
    pub fn iter(&self) -> impl Iterator<Item = (K, &V)> {
        self.forward.iter()
    }
}
