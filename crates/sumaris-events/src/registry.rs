//! # Listener Registry
//!
//! Maps a composite key to the set of listeners interested in it:
//!
//! - `Vessel` (entity key): every event about any vessel
//! - `Vessel#12` (instance key): events about vessel 12 only
//!
//! The registry is a concurrent map of concurrent sets, so registration,
//! disposal and dispatch can run from any task at the same time.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use dashmap::DashMap;
use sumaris_types::EntityId;
pub use sumaris_types::INSTANCE_KEY_SEPARATOR;
use tracing::debug;

/// Key matching every event about `entity_name`.
#[must_use]
pub fn entity_key(entity_name: &str) -> String {
    entity_name.to_string()
}

/// Key matching events about one entity instance.
#[must_use]
pub fn instance_key(entity_name: &str, id: &EntityId) -> String {
    format!("{entity_name}{INSTANCE_KEY_SEPARATOR}{id}")
}

type RegistrationId = u64;

struct RegistryInner<L: ?Sized> {
    listeners: DashMap<String, DashMap<RegistrationId, Arc<L>>>,
    next_id: AtomicU64,
}

/// Removal side of a registry, independent of the listener type.
trait Unregister: Send + Sync {
    fn unregister(&self, key: &str, id: RegistrationId);
}

impl<L: ?Sized + Send + Sync> Unregister for RegistryInner<L> {
    fn unregister(&self, key: &str, id: RegistrationId) {
        {
            let Some(set) = self.listeners.get(key) else {
                return;
            };
            set.remove(&id);
        }
        // Prune under the shard write lock so a concurrent register on the
        // same key is not lost
        self.listeners.remove_if(key, |_, set| set.is_empty());
    }
}

/// Registry of listeners keyed by entity or entity instance.
pub struct ListenerRegistry<L: ?Sized> {
    inner: Arc<RegistryInner<L>>,
}

impl<L: ?Sized> Clone for ListenerRegistry<L> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<L: ?Sized + Send + Sync + 'static> Default for ListenerRegistry<L> {
    fn default() -> Self {
        Self::new()
    }
}

impl<L: ?Sized + Send + Sync + 'static> ListenerRegistry<L> {
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                listeners: DashMap::new(),
                next_id: AtomicU64::new(1),
            }),
        }
    }

    /// Register `listener` under each of `keys`.
    ///
    /// Returns a handle that removes exactly these registrations when
    /// disposed or dropped. Registering the same listener again creates
    /// independent registrations.
    #[must_use = "dropping the registration unregisters the listener"]
    pub fn register<I, K>(&self, keys: I, listener: Arc<L>) -> ListenerRegistration
    where
        I: IntoIterator<Item = K>,
        K: Into<String>,
    {
        let mut entries = Vec::new();
        for key in keys {
            let key = key.into();
            let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
            self.inner
                .listeners
                .entry(key.clone())
                .or_default()
                .insert(id, Arc::clone(&listener));
            entries.push((key, id));
        }

        let keys: Vec<&str> = entries.iter().map(|(k, _)| k.as_str()).collect();
        debug!(keys = ?keys, "Listener registered");

        let inner: Arc<dyn Unregister> = self.inner.clone();
        ListenerRegistration {
            entries,
            registry: Arc::downgrade(&inner),
        }
    }

    /// Register `listener` for one entity instance.
    #[must_use = "dropping the registration unregisters the listener"]
    pub fn register_instance(
        &self,
        entity_name: &str,
        id: &EntityId,
        listener: Arc<L>,
    ) -> ListenerRegistration {
        self.register([instance_key(entity_name, id)], listener)
    }

    /// Union of the listeners registered under `keys`.
    ///
    /// A listener registered under several of the keys appears once.
    #[must_use]
    pub fn lookup(&self, keys: &[String]) -> Vec<Arc<L>> {
        let mut found: Vec<Arc<L>> = Vec::new();
        for key in keys {
            let Some(set) = self.inner.listeners.get(key) else {
                continue;
            };
            for entry in set.iter() {
                let listener = entry.value();
                if !found.iter().any(|l| same_listener(l, listener)) {
                    found.push(Arc::clone(listener));
                }
            }
        }
        found
    }

    /// Number of registrations under `key`.
    #[must_use]
    pub fn listener_count(&self, key: &str) -> usize {
        self.inner.listeners.get(key).map_or(0, |set| set.len())
    }

    /// Total number of registrations.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.listeners.iter().map(|set| set.len()).sum()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Keys that currently have at least one registration.
    #[must_use]
    pub fn keys(&self) -> Vec<String> {
        self.inner
            .listeners
            .iter()
            .map(|entry| entry.key().clone())
            .collect()
    }
}

fn same_listener<L: ?Sized>(a: &Arc<L>, b: &Arc<L>) -> bool {
    // Compare data pointers only: vtables of the same type may differ
    // between codegen units
    std::ptr::eq(Arc::as_ptr(a).cast::<()>(), Arc::as_ptr(b).cast::<()>())
}

/// Handle returned by [`ListenerRegistry::register`].
///
/// Dropping the handle unregisters the listener.
pub struct ListenerRegistration {
    entries: Vec<(String, RegistrationId)>,
    registry: Weak<dyn Unregister>,
}

impl ListenerRegistration {
    /// Remove the registrations this handle created.
    pub fn dispose(mut self) {
        self.unregister_all();
    }

    /// Keys this handle registered under.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(key, _)| key.as_str())
    }

    fn unregister_all(&mut self) {
        let entries = std::mem::take(&mut self.entries);
        if entries.is_empty() {
            return;
        }
        let Some(registry) = self.registry.upgrade() else {
            return;
        };
        for (key, id) in &entries {
            registry.unregister(key, *id);
        }
        let keys: Vec<&str> = entries.iter().map(|(k, _)| k.as_str()).collect();
        debug!(keys = ?keys, "Listener unregistered");
    }
}

impl Drop for ListenerRegistration {
    fn drop(&mut self) {
        self.unregister_all();
    }
}
