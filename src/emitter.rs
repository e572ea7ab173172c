use std::any::Any;
use std::collections::{BTreeMap, HashMap};
use std::fmt::Debug;
use std::hash::Hash;
use std::ops::Bound;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use parking_lot::Mutex;

/// Listener callbacks take the event payload by reference and return nothing.
type ListenerFn<E> = dyn Fn(&E) + Send + Sync;

/// Opaque registration handle returned by [`EventEmitter::subscribe`].
///
/// Pass it back unchanged to [`EventEmitter::unsubscribe`]. Handles are never
/// reissued for the same key while the emitter lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerHandle<K> {
    key: K,
    id: u64,
}

/// One lazily-created group per event key: the registered callbacks keyed by
/// id, plus the counter the next subscription on this key will take.
struct ListenerGroup<E> {
    next_id: u64,
    listeners: BTreeMap<u64, Arc<ListenerFn<E>>>,
}

impl<E> Default for ListenerGroup<E> {
    fn default() -> Self {
        Self {
            next_id: 0,
            listeners: BTreeMap::new(),
        }
    }
}

/// Generic typed publish/subscribe dispatcher.
///
/// Keys select an ordered group of listeners; emission walks the group in
/// registration order. A panicking listener is caught and logged without
/// affecting its siblings or the emitting caller, and the listener tables may
/// be mutated from any thread at any time, including from inside a callback
/// during an in-progress emission: a listener removed before the walk reaches
/// it is skipped, listeners that already ran are unaffected.
pub struct EventEmitter<K, E> {
    tables: Mutex<HashMap<K, ListenerGroup<E>>>,
}

impl<K, E> Default for EventEmitter<K, E> {
    fn default() -> Self {
        Self {
            tables: Mutex::new(HashMap::new()),
        }
    }
}

impl<K, E> EventEmitter<K, E>
where
    K: Copy + Eq + Hash + Debug,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `callback` under `key`, creating the key's group on first
    /// use. Infallible; the returned handle is the only way to remove the
    /// registration again.
    pub fn subscribe(
        &self,
        key: K,
        callback: impl Fn(&E) + Send + Sync + 'static,
    ) -> ListenerHandle<K> {
        let mut tables = self.tables.lock();
        let group = tables.entry(key).or_default();
        let id = group.next_id;
        group.next_id += 1;
        group.listeners.insert(id, Arc::new(callback));
        ListenerHandle { key, id }
    }

    /// Remove the registration behind `handle`. Removing a handle that is
    /// unknown or already removed is a no-op.
    pub fn unsubscribe(&self, handle: ListenerHandle<K>) {
        let mut tables = self.tables.lock();
        if let Some(group) = tables.get_mut(&handle.key) {
            group.listeners.remove(&handle.id);
        }
    }

    /// Invoke every listener currently registered under `key`, oldest
    /// registration first. No group or an empty group is a silent no-op.
    ///
    /// The table lock is released around each callback, so callbacks may
    /// subscribe and unsubscribe freely. Iteration re-resolves the next id
    /// after every call rather than snapshotting the group up front; that is
    /// what makes mid-emission removal take effect within the same pass.
    pub fn emit(&self, key: K, payload: &E) {
        let mut last_id: Option<u64> = None;
        loop {
            let next = {
                let tables = self.tables.lock();
                let Some(group) = tables.get(&key) else {
                    return;
                };
                let start = match last_id {
                    Some(id) => Bound::Excluded(id),
                    None => Bound::Unbounded,
                };
                group
                    .listeners
                    .range((start, Bound::Unbounded))
                    .next()
                    .map(|(id, callback)| (*id, Arc::clone(callback)))
            };
            let Some((id, callback)) = next else {
                return;
            };
            last_id = Some(id);

            if let Err(panic) = catch_unwind(AssertUnwindSafe(|| callback(payload))) {
                tracing::error!(
                    key = ?key,
                    listener = id,
                    panic = payload_as_str(panic.as_ref()),
                    "event listener panicked during emit",
                );
            }
        }
    }

    /// Number of listeners currently registered under `key`.
    pub fn listener_count(&self, key: K) -> usize {
        self.tables
            .lock()
            .get(&key)
            .map_or(0, |group| group.listeners.len())
    }
}

/// Copied from the std's default hook (v1.81.0)
fn payload_as_str(payload: &dyn Any) -> &str {
    if let Some(&s) = payload.downcast_ref::<&'static str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.as_str()
    } else {
        "Box<dyn Any>"
    }
}
