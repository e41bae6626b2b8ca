//! # Copy-on-Write Trie
//!
//! A persistent byte-keyed trie: `put` and `remove` never mutate, they
//! return a new root sharing every untouched subtree with the old one.
//! Readers therefore hold immutable snapshots for free.
//!
//! ```text
//!   put("ab", 2) on        old root          new root
//!                            │  \              │
//!                           "a"  shared ◄──── "a'"
//!                            │      subtrees   │
//!                           "b"               "b'=2"
//! ```
//!
//! [`TrieStore`] wraps the trie with the engine's concurrency discipline:
//! a root lock taken only to swap or snapshot the root, and a write lock
//! serializing writers so each builds on the latest version. Readers never
//! wait on writers; a [`ValueGuard`] keeps the value alive (values are
//! `Arc`-shared into the snapshots) after the store has moved on.

use std::sync::Arc;

use hashbrown::HashMap;
use parking_lot::Mutex;

struct TrieNode<T> {
    children: HashMap<u8, Arc<TrieNode<T>>>,
    value: Option<Arc<T>>,
}

impl<T> TrieNode<T> {
    fn leaf(value: Option<Arc<T>>) -> Self {
        Self {
            children: HashMap::new(),
            value,
        }
    }

    fn shallow_clone(&self) -> Self {
        Self {
            children: self.children.clone(),
            value: self.value.clone(),
        }
    }

    fn is_empty(&self) -> bool {
        self.children.is_empty() && self.value.is_none()
    }
}

pub struct Trie<T> {
    root: Option<Arc<TrieNode<T>>>,
}

impl<T> Clone for Trie<T> {
    fn clone(&self) -> Self {
        Self {
            root: self.root.clone(),
        }
    }
}

impl<T> Default for Trie<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Trie<T> {
    pub fn new() -> Self {
        Self { root: None }
    }

    pub fn get(&self, key: &[u8]) -> Option<&T> {
        let mut node = self.root.as_ref()?;
        for byte in key {
            node = node.children.get(byte)?;
        }
        node.value.as_deref()
    }

    fn get_arc(&self, key: &[u8]) -> Option<Arc<T>> {
        let mut node = self.root.as_ref()?;
        for byte in key {
            node = node.children.get(byte)?;
        }
        node.value.clone()
    }

    /// Returns a new trie with `key` mapped to `value`; the old trie is
    /// untouched.
    pub fn put(&self, key: &[u8], value: T) -> Trie<T> {
        let value = Arc::new(value);
        let new_root = Self::put_node(self.root.as_deref(), key, value);
        Trie {
            root: Some(Arc::new(new_root)),
        }
    }

    fn put_node(node: Option<&TrieNode<T>>, key: &[u8], value: Arc<T>) -> TrieNode<T> {
        let mut copy = match node {
            Some(node) => node.shallow_clone(),
            None => TrieNode::leaf(None),
        };
        match key.split_first() {
            None => copy.value = Some(value),
            Some((first, rest)) => {
                let child = copy.children.get(first).map(|c| c.as_ref());
                let new_child = Self::put_node(child, rest, value);
                copy.children.insert(*first, Arc::new(new_child));
            }
        }
        copy
    }

    /// Returns a new trie without `key`, pruning nodes left with neither
    /// value nor children.
    pub fn remove(&self, key: &[u8]) -> Trie<T> {
        match self.root.as_deref() {
            None => self.clone(),
            Some(root) => Trie {
                root: Self::remove_node(root, key).map(Arc::new),
            },
        }
    }

    /// `None` means the node ended up with neither value nor children and
    /// should be pruned by its parent.
    fn remove_node(node: &TrieNode<T>, key: &[u8]) -> Option<TrieNode<T>> {
        let mut copy = node.shallow_clone();
        match key.split_first() {
            None => copy.value = None,
            Some((first, rest)) => match copy.children.get(first).cloned() {
                // Key absent: nothing changes below this node.
                None => return Some(copy),
                Some(child) => match Self::remove_node(&child, rest) {
                    Some(new_child) => {
                        copy.children.insert(*first, Arc::new(new_child));
                    }
                    None => {
                        copy.children.remove(first);
                    }
                },
            },
        }
        if copy.is_empty() {
            None
        } else {
            Some(copy)
        }
    }
}

/// Keeps a looked-up value alive independent of subsequent store writes.
pub struct ValueGuard<T> {
    value: Arc<T>,
}

impl<T> std::ops::Deref for ValueGuard<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.value
    }
}

/// Concurrent façade over the copy-on-write trie.
pub struct TrieStore<T> {
    root: Mutex<Trie<T>>,
    write_lock: Mutex<()>,
}

impl<T> Default for TrieStore<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> TrieStore<T> {
    pub fn new() -> Self {
        Self {
            root: Mutex::new(Trie::new()),
            write_lock: Mutex::new(()),
        }
    }

    /// Lock-free after snapshotting the root: the returned guard stays
    /// valid however the store changes afterwards.
    pub fn get(&self, key: &[u8]) -> Option<ValueGuard<T>> {
        let snapshot = self.root.lock().clone();
        snapshot.get_arc(key).map(|value| ValueGuard { value })
    }

    pub fn put(&self, key: &[u8], value: T) {
        let _writer = self.write_lock.lock();
        let snapshot = self.root.lock().clone();
        let new_root = snapshot.put(key, value);
        *self.root.lock() = new_root;
    }

    pub fn remove(&self, key: &[u8]) {
        let _writer = self.write_lock.lock();
        let snapshot = self.root.lock().clone();
        let new_root = snapshot.remove(key);
        *self.root.lock() = new_root;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn put_get_round_trip() {
        let trie = Trie::new().put(b"hello", 1).put(b"help", 2).put(b"he", 3);
        assert_eq!(trie.get(b"hello"), Some(&1));
        assert_eq!(trie.get(b"help"), Some(&2));
        assert_eq!(trie.get(b"he"), Some(&3));
        assert_eq!(trie.get(b"hel"), None);
        assert_eq!(trie.get(b"x"), None);
    }

    #[test]
    fn old_versions_are_untouched() {
        let v1 = Trie::new().put(b"k", 1);
        let v2 = v1.put(b"k", 2);
        let v3 = v2.remove(b"k");

        assert_eq!(v1.get(b"k"), Some(&1));
        assert_eq!(v2.get(b"k"), Some(&2));
        assert_eq!(v3.get(b"k"), None);
    }

    #[test]
    fn remove_prunes_dead_branches() {
        let trie = Trie::new().put(b"abc", 1);
        let emptied = trie.remove(b"abc");
        assert!(emptied.root.is_none(), "empty trie has no root");

        let partial = Trie::new().put(b"ab", 1).put(b"abcd", 2).remove(b"abcd");
        assert_eq!(partial.get(b"ab"), Some(&1));
        assert_eq!(partial.get(b"abcd"), None);
    }

    #[test]
    fn remove_of_missing_key_is_identity() {
        let trie = Trie::new().put(b"a", 1);
        let same = trie.remove(b"zzz");
        assert_eq!(same.get(b"a"), Some(&1));
    }

    #[test]
    fn empty_key_is_a_valid_key() {
        let trie = Trie::new().put(b"", 42);
        assert_eq!(trie.get(b""), Some(&42));
        assert!(trie.remove(b"").root.is_none());
    }

    #[test]
    fn store_guards_outlive_overwrites() {
        let store = TrieStore::new();
        store.put(b"k", String::from("one"));

        let guard = store.get(b"k").unwrap();
        store.put(b"k", String::from("two"));
        store.remove(b"k");

        assert_eq!(&*guard, "one");
        assert!(store.get(b"k").is_none());
    }

    #[test]
    fn concurrent_readers_and_writers() {
        let store = Arc::new(TrieStore::new());
        let writers: Vec<_> = (0..2)
            .map(|t| {
                let store = Arc::clone(&store);
                std::thread::spawn(move || {
                    for i in 0..100u32 {
                        store.put(format!("{t}-{i}").as_bytes(), i);
                    }
                })
            })
            .collect();
        let readers: Vec<_> = (0..2)
            .map(|_| {
                let store = Arc::clone(&store);
                std::thread::spawn(move || {
                    for i in 0..100u32 {
                        // Whatever snapshot we catch must be internally sane.
                        if let Some(v) = store.get(format!("0-{i}").as_bytes()) {
                            assert_eq!(*v, i);
                        }
                    }
                })
            })
            .collect();
        for h in writers.into_iter().chain(readers) {
            h.join().unwrap();
        }

        for t in 0..2 {
            for i in 0..100u32 {
                assert_eq!(*store.get(format!("{t}-{i}").as_bytes()).unwrap(), i);
            }
        }
    }
}
