//! A map of dense integer key to value.

use std::marker::PhantomData;

pub trait Index: From<usize> {
    fn index(&self) -> usize;
}

/// A map of a dense integer key to value, implemented as a vector.
/// Keys are handed out in insertion order and never reused; removing an
/// entry leaves a hole, so a stale key simply looks up nothing.
pub struct DenseMap<K, V> {
    vec: Vec<Option<V>>,
    live: usize,
    key_type: PhantomData<K>,
}

impl<K, V> Default for DenseMap<K, V> {
    fn default() -> Self {
        DenseMap {
            vec: Vec::default(),
            live: 0,
            key_type: PhantomData,
        }
    }
}

impl<K: Index, V> std::ops::Index<K> for DenseMap<K, V> {
    type Output = V;

    fn index(&self, k: K) -> &Self::Output {
        let i = k.index();
        self.vec[i]
            .as_ref()
            .unwrap_or_else(|| panic!("lookup of removed entry {}", i))
    }
}

impl<K: Index, V> std::ops::IndexMut<K> for DenseMap<K, V> {
    fn index_mut(&mut self, k: K) -> &mut Self::Output {
        let i = k.index();
        self.vec[i]
            .as_mut()
            .unwrap_or_else(|| panic!("lookup of removed entry {}", i))
    }
}

impl<K: Index, V> DenseMap<K, V> {
    pub fn lookup(&self, k: K) -> Option<&V> {
        self.vec.get(k.index()).and_then(|v| v.as_ref())
    }

    pub fn lookup_mut(&mut self, k: K) -> Option<&mut V> {
        self.vec.get_mut(k.index()).and_then(|v| v.as_mut())
    }

    pub fn next_id(&self) -> K {
        K::from(self.vec.len())
    }

    pub fn push(&mut self, val: V) -> K {
        let id = self.next_id();
        self.vec.push(Some(val));
        self.live += 1;
        id
    }

    pub fn remove(&mut self, k: K) -> Option<V> {
        let val = self.vec.get_mut(k.index()).and_then(|v| v.take());
        if val.is_some() {
            self.live -= 1;
        }
        val
    }

    /// Number of live entries.
    pub fn len(&self) -> usize {
        self.live
    }

    pub fn is_empty(&self) -> bool {
        self.live == 0
    }

    /// Live keys, in insertion order.
    pub fn all_ids(&self) -> impl Iterator<Item = K> + '_ {
        self.vec
            .iter()
            .enumerate()
            .filter(|(_, v)| v.is_some())
            .map(|(i, _)| K::from(i))
    }

    pub fn iter(&self) -> impl Iterator<Item = (K, &V)> + '_ {
        self.vec
            .iter()
            .enumerate()
            .filter_map(|(i, v)| v.as_ref().map(|v| (K::from(i), v)))
    }
}
