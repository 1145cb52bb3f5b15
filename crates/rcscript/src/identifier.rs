//! Cache identifiers and the rules deciding when two identifiers match.

use crate::script::Script;
use dashmap::DashMap;
use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

/// Object-safe view over identifier values.
trait IdentifierKey: Any + Send + Sync + fmt::Debug {
    fn key_eq(&self, other: &dyn IdentifierKey) -> bool;
    fn key_hash(&self, state: &mut dyn Hasher);
    fn as_any(&self) -> &dyn Any;
}

impl<T> IdentifierKey for T
where
    T: Any + Eq + Hash + Send + Sync + fmt::Debug,
{
    fn key_eq(&self, other: &dyn IdentifierKey) -> bool {
        other
            .as_any()
            .downcast_ref::<T>()
            .is_some_and(|other| self == other)
    }

    fn key_hash(&self, mut state: &mut dyn Hasher) {
        TypeId::of::<T>().hash(&mut state);
        self.hash(&mut state);
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// An opaque cache key.
///
/// Any `Eq + Hash` value can serve as an identifier. Clones share the same
/// allocation, which is what [`IdentifierRule::Identity`] compares.
#[derive(Clone)]
pub struct Identifier(Arc<dyn IdentifierKey>);

impl Identifier {
    pub fn new<T>(value: T) -> Self
    where
        T: Any + Eq + Hash + Send + Sync + fmt::Debug,
    {
        Self(Arc::new(value))
    }

    /// A fresh identifier backed by a random UUID.
    pub fn random() -> Self {
        Self::new(uuid::Uuid::new_v4())
    }

    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.0.as_any().downcast_ref::<T>()
    }

    /// The string value, if this identifier was built from a string.
    pub fn as_str(&self) -> Option<&str> {
        self.downcast_ref::<String>().map(String::as_str)
    }

    /// Whether both identifiers are the same object.
    pub fn same_object(&self, other: &Identifier) -> bool {
        self.address() == other.address()
    }

    /// Whether both identifiers hold equal values of the same type.
    pub fn value_eq(&self, other: &Identifier) -> bool {
        self.0.key_eq(other.0.as_ref())
    }

    fn address(&self) -> *const () {
        Arc::as_ptr(&self.0) as *const ()
    }
}

impl fmt::Debug for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Identifier").field(&self.0).finish()
    }
}

impl From<&str> for Identifier {
    fn from(value: &str) -> Self {
        Self::new(value.to_string())
    }
}

impl From<String> for Identifier {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

impl From<uuid::Uuid> for Identifier {
    fn from(value: uuid::Uuid) -> Self {
        Self::new(value)
    }
}

macro_rules! integer_identifiers {
    ($($ty:ty),*) => {$(
        impl From<$ty> for Identifier {
            fn from(value: $ty) -> Self {
                Self::new(value)
            }
        }
    )*};
}

integer_identifiers!(i32, i64, u32, u64, usize);

/// Key wrapper matching on object identity.
#[derive(Clone, Debug)]
struct ByAddress(Identifier);

impl PartialEq for ByAddress {
    fn eq(&self, other: &Self) -> bool {
        self.0.same_object(&other.0)
    }
}

impl Eq for ByAddress {}

impl Hash for ByAddress {
    fn hash<H: Hasher>(&self, state: &mut H) {
        (self.0.address() as usize).hash(state);
    }
}

/// Key wrapper matching on value equality.
#[derive(Clone, Debug)]
struct ByValue(Identifier);

impl PartialEq for ByValue {
    fn eq(&self, other: &Self) -> bool {
        self.0.value_eq(&other.0)
    }
}

impl Eq for ByValue {}

impl Hash for ByValue {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.0.0.key_hash(state);
    }
}

/// How identifiers are matched inside a manager's script cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum IdentifierRule {
    /// Same object only.
    Identity,
    /// Equal values.
    #[default]
    Equality,
    /// Equal values, with a container that tolerates concurrent writers.
    ConcurrentEquality,
}

impl IdentifierRule {
    /// Fresh empty container with this rule's key semantics.
    pub fn generate_new_map(self) -> ScriptCache {
        match self {
            IdentifierRule::Identity => ScriptCache {
                map: CacheMap::Identity(HashMap::new()),
            },
            IdentifierRule::Equality => ScriptCache {
                map: CacheMap::Equality(HashMap::new()),
            },
            IdentifierRule::ConcurrentEquality => ScriptCache {
                map: CacheMap::Concurrent(DashMap::new()),
            },
        }
    }
}

/// Identifier → script container produced by an [`IdentifierRule`].
///
/// Mutation through `&mut self` works for every rule; the concurrent rule
/// also accepts writes through `&self` (see [`ScriptCache::shared_insert`]).
pub struct ScriptCache {
    map: CacheMap,
}

enum CacheMap {
    Identity(HashMap<ByAddress, Script>),
    Equality(HashMap<ByValue, Script>),
    Concurrent(DashMap<ByValue, Script>),
}

impl ScriptCache {
    pub fn rule(&self) -> IdentifierRule {
        match &self.map {
            CacheMap::Identity(_) => IdentifierRule::Identity,
            CacheMap::Equality(_) => IdentifierRule::Equality,
            CacheMap::Concurrent(_) => IdentifierRule::ConcurrentEquality,
        }
    }

    pub fn len(&self) -> usize {
        match &self.map {
            CacheMap::Identity(map) => map.len(),
            CacheMap::Equality(map) => map.len(),
            CacheMap::Concurrent(map) => map.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, id: &Identifier) -> Option<Script> {
        match &self.map {
            CacheMap::Identity(map) => map.get(&ByAddress(id.clone())).cloned(),
            CacheMap::Equality(map) => map.get(&ByValue(id.clone())).cloned(),
            CacheMap::Concurrent(map) => map.get(&ByValue(id.clone())).map(|e| e.value().clone()),
        }
    }

    pub fn contains(&self, id: &Identifier) -> bool {
        match &self.map {
            CacheMap::Identity(map) => map.contains_key(&ByAddress(id.clone())),
            CacheMap::Equality(map) => map.contains_key(&ByValue(id.clone())),
            CacheMap::Concurrent(map) => map.contains_key(&ByValue(id.clone())),
        }
    }

    /// Inserts or replaces, returning the previous script.
    pub fn insert(&mut self, id: Identifier, script: Script) -> Option<Script> {
        match &mut self.map {
            CacheMap::Identity(map) => map.insert(ByAddress(id), script),
            CacheMap::Equality(map) => map.insert(ByValue(id), script),
            CacheMap::Concurrent(map) => map.insert(ByValue(id), script),
        }
    }

    /// Inserts only when no matching key exists. Returns whether it inserted.
    pub fn insert_if_absent(&mut self, id: Identifier, script: Script) -> bool {
        match &mut self.map {
            CacheMap::Identity(map) => absent_insert(map.entry(ByAddress(id)), script),
            CacheMap::Equality(map) => absent_insert(map.entry(ByValue(id)), script),
            CacheMap::Concurrent(map) => match map.entry(ByValue(id)) {
                dashmap::mapref::entry::Entry::Occupied(_) => false,
                dashmap::mapref::entry::Entry::Vacant(slot) => {
                    slot.insert(script);
                    true
                }
            },
        }
    }

    pub fn remove(&mut self, id: &Identifier) -> Option<Script> {
        match &mut self.map {
            CacheMap::Identity(map) => map.remove(&ByAddress(id.clone())),
            CacheMap::Equality(map) => map.remove(&ByValue(id.clone())),
            CacheMap::Concurrent(map) => map.remove(&ByValue(id.clone())).map(|(_, s)| s),
        }
    }

    /// Lock-free insert for the concurrent container.
    ///
    /// Hands the entry back when this container needs `&mut self` instead.
    pub fn shared_insert(
        &self,
        id: Identifier,
        script: Script,
    ) -> Result<Option<Script>, (Identifier, Script)> {
        match &self.map {
            CacheMap::Concurrent(map) => Ok(map.insert(ByValue(id), script)),
            _ => Err((id, script)),
        }
    }

    /// Shared-access removal for the concurrent container; `None` otherwise.
    pub fn shared_remove(&self, id: &Identifier) -> Option<Option<Script>> {
        match &self.map {
            CacheMap::Concurrent(map) => Some(map.remove(&ByValue(id.clone())).map(|(_, s)| s)),
            _ => None,
        }
    }

    pub fn clear(&mut self) {
        match &mut self.map {
            CacheMap::Identity(map) => map.clear(),
            CacheMap::Equality(map) => map.clear(),
            CacheMap::Concurrent(map) => map.clear(),
        }
    }

    /// Snapshot of every identifier/script pair.
    pub fn entries(&self) -> Vec<(Identifier, Script)> {
        match &self.map {
            CacheMap::Identity(map) => map
                .iter()
                .map(|(k, v)| (k.0.clone(), v.clone()))
                .collect(),
            CacheMap::Equality(map) => map
                .iter()
                .map(|(k, v)| (k.0.clone(), v.clone()))
                .collect(),
            CacheMap::Concurrent(map) => map
                .iter()
                .map(|e| (e.key().0.clone(), e.value().clone()))
                .collect(),
        }
    }

    /// Moves every entry into a container of `rule`; first entry wins on collision.
    pub fn migrate(self, rule: IdentifierRule) -> ScriptCache {
        let mut next = rule.generate_new_map();
        for (id, script) in self.entries() {
            next.insert_if_absent(id, script);
        }
        next
    }
}

fn absent_insert<K>(
    entry: std::collections::hash_map::Entry<'_, K, Script>,
    script: Script,
) -> bool {
    match entry {
        std::collections::hash_map::Entry::Occupied(_) => false,
        std::collections::hash_map::Entry::Vacant(slot) => {
            slot.insert(script);
            true
        }
    }
}

impl Default for ScriptCache {
    fn default() -> Self {
        IdentifierRule::default().generate_new_map()
    }
}

impl fmt::Debug for ScriptCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScriptCache")
            .field("rule", &self.rule())
            .field("len", &self.len())
            .finish()
    }
}
