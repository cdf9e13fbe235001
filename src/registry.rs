use std::{cell::RefCell, rc::Rc};

use slabmap::SlabMap;


/// Key equivalence for registry entries.
///
/// Plain values compare by equality so waiters on the same value share one
/// entry. Closures compare by `Rc` identity and never share unless the caller
/// passes the same allocation.
pub(crate) trait RegistryKey {
    fn same_key(&self, other: &Self) -> bool;
}

/// Map from key to a ref-counted entry.
///
/// Entries are created on first `open_ref` and removed exactly when the last
/// [`EntryRef`] drops. Lookup is a linear scan with [`RegistryKey::same_key`];
/// entry counts stay small (one per distinct predicate), waiter counts do not
/// affect them.
pub(crate) struct Registry<K, V>(Rc<RefCell<RegistryData<K, V>>>);

struct RegistryData<K, V> {
    entries: SlabMap<Entry<K, V>>,
}

struct Entry<K, V> {
    key: K,
    value: V,
    refs: usize,
}

impl<K, V> Registry<K, V> {
    pub fn new() -> Self {
        Self(Rc::new(RefCell::new(RegistryData {
            entries: SlabMap::new(),
        })))
    }

    /// Visit every entry in slot order. Entries must not be added or removed
    /// from inside `f`.
    pub fn scan(&self, mut f: impl FnMut(&K, &mut V)) {
        let mut data = self.0.borrow_mut();
        data.entries.optimize();
        for entry in data.entries.values_mut() {
            f(&entry.key, &mut entry.value);
        }
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.0.borrow().entries.len()
    }
}

impl<K: RegistryKey, V> Registry<K, V> {
    /// Fetch or create the entry for `key`, keeping it alive until the
    /// returned guard drops.
    pub fn open_ref(&self, key: K, init: impl FnOnce() -> V) -> EntryRef<K, V> {
        let mut data = self.0.borrow_mut();
        let id = data.find(&key);
        let id = match id {
            Some(id) => {
                data.entries[id].refs += 1;
                id
            }
            None => data.entries.insert(Entry {
                key,
                value: init(),
                refs: 1,
            }),
        };
        EntryRef {
            data: self.0.clone(),
            id,
        }
    }
}

impl<K, V> Clone for Registry<K, V> {
    fn clone(&self) -> Self {
        Self(self.0.clone())
    }
}

impl<K, V> Default for Registry<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: RegistryKey, V> RegistryData<K, V> {
    fn find(&self, key: &K) -> Option<usize> {
        self.entries
            .iter()
            .find(|(_, e)| e.key.same_key(key))
            .map(|(id, _)| id)
    }
}

/// Guard for one registry entry. The entry exists at least as long as any
/// guard for it; the last guard's drop removes it.
pub(crate) struct EntryRef<K, V> {
    data: Rc<RefCell<RegistryData<K, V>>>,
    id: usize,
}

impl<K, V> EntryRef<K, V> {
    pub fn with<R>(&self, f: impl FnOnce(&mut V) -> R) -> R {
        let mut data = self.data.borrow_mut();
        f(&mut data.entries[self.id].value)
    }
}

impl<K, V> Clone for EntryRef<K, V> {
    fn clone(&self) -> Self {
        self.data.borrow_mut().entries[self.id].refs += 1;
        Self {
            data: self.data.clone(),
            id: self.id,
        }
    }
}

impl<K, V> Drop for EntryRef<K, V> {
    fn drop(&mut self) {
        let mut data = self.data.borrow_mut();
        let entry = &mut data.entries[self.id];
        entry.refs -= 1;
        if entry.refs == 0 {
            data.entries.remove(self.id);
        }
    }
}
