//! String- and long-keyed hash maps with removal hooks and a cursor iterator.
//!
//! Both maps share one bucket/chain core. Buckets always number a power of
//! two; crossing `floor(capacity * load_factor)` entries doubles the bucket
//! array and relinks the existing entries in place. A configured removal
//! callback fires for every entry that is removed, cleared or dropped with
//! the map, which is what the descriptor engines rely on for value cleanup.
//!
//! Iteration is bucket-major, then chain order, and is deterministic as long
//! as the map is not mutated. The [`Cursor`] additionally supports removing
//! the entry it currently points at and continuing the traversal.

use std::collections::hash_map::DefaultHasher;
use std::ffi::c_void;
use std::hash::{Hash, Hasher};

const DEFAULT_INITIAL_CAPACITY: usize = 16;
const DEFAULT_LOAD_FACTOR: f64 = 0.75;
const MAXIMUM_CAPACITY: usize = (i32::MAX / 10) as usize;

/// Entry payload for the union-valued map fronts.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Value {
    Ptr(*mut c_void),
    Long(i64),
    Double(f64),
    Bool(bool),
}

impl Default for Value {
    fn default() -> Self {
        Value::Ptr(std::ptr::null_mut())
    }
}

/// Hook invoked for every entry leaving the map.
pub enum RemovedCallback<K, V> {
    /// Receives only the removed value.
    Simple(Box<dyn FnMut(&mut V)>),
    /// Receives the key and the removed value.
    Keyed(Box<dyn FnMut(&K, &mut V)>),
}

/// Map construction options. A default-constructed value selects the stable
/// defaults (capacity 16, load factor 0.75, no callback).
pub struct MapOptions<K, V> {
    /// Initial bucket count; rounded up to a power of two. 0 selects the
    /// default.
    pub initial_capacity: usize,
    /// Resize threshold as a fraction of the bucket count. 0.0 selects the
    /// default.
    pub load_factor: f64,
    pub removed: Option<RemovedCallback<K, V>>,
}

impl<K, V> Default for MapOptions<K, V> {
    fn default() -> Self {
        MapOptions {
            initial_capacity: 0,
            load_factor: 0.0,
            removed: None,
        }
    }
}

struct Entry<K, V> {
    hash: u64,
    key: K,
    value: V,
    next: Option<Box<Entry<K, V>>>,
}

struct RawMap<K, V> {
    buckets: Vec<Option<Box<Entry<K, V>>>>,
    size: usize,
    load_factor: f64,
    removed: Option<RemovedCallback<K, V>>,
}

impl<K, V> RawMap<K, V> {
    fn with_options(opts: MapOptions<K, V>) -> Self {
        let cap = if opts.initial_capacity == 0 {
            DEFAULT_INITIAL_CAPACITY
        } else {
            opts.initial_capacity.next_power_of_two()
        };
        let load_factor = if opts.load_factor > 0.0 {
            opts.load_factor
        } else {
            DEFAULT_LOAD_FACTOR
        };
        RawMap {
            buckets: (0..cap).map(|_| None).collect(),
            size: 0,
            load_factor,
            removed: opts.removed,
        }
    }

    fn index_of(&self, hash: u64) -> usize {
        (hash as usize) & (self.buckets.len() - 1)
    }

    fn threshold(&self) -> usize {
        (self.buckets.len() as f64 * self.load_factor).floor() as usize
    }

    fn find_pos(&self, hash: u64, mut eq: impl FnMut(&K) -> bool) -> Option<(usize, usize)> {
        let bucket = self.index_of(hash);
        let mut cur = self.buckets[bucket].as_deref();
        let mut depth = 0;
        while let Some(e) = cur {
            if e.hash == hash && eq(&e.key) {
                return Some((bucket, depth));
            }
            cur = e.next.as_deref();
            depth += 1;
        }
        None
    }

    fn entry_at(&self, bucket: usize, depth: usize) -> Option<&Entry<K, V>> {
        let mut cur = self.buckets.get(bucket)?.as_deref();
        for _ in 0..depth {
            cur = cur?.next.as_deref();
        }
        cur
    }

    fn entry_at_mut(&mut self, bucket: usize, depth: usize) -> Option<&mut Entry<K, V>> {
        let mut cur = self.buckets.get_mut(bucket)?.as_deref_mut();
        for _ in 0..depth {
            cur = cur?.next.as_deref_mut();
        }
        cur
    }

    fn put_with(
        &mut self,
        hash: u64,
        eq: impl FnMut(&K) -> bool,
        make_key: impl FnOnce() -> K,
        value: V,
    ) -> Option<V> {
        if let Some((bucket, depth)) = self.find_pos(hash, eq) {
            let entry = self.entry_at_mut(bucket, depth)?;
            return Some(std::mem::replace(&mut entry.value, value));
        }
        let bucket = self.index_of(hash);
        let next = self.buckets[bucket].take();
        self.buckets[bucket] = Some(Box::new(Entry {
            hash,
            key: make_key(),
            value,
            next,
        }));
        self.size += 1;
        if self.size > self.threshold() {
            let new_cap = self.buckets.len() * 2;
            self.resize(new_cap);
        }
        None
    }

    fn resize(&mut self, new_cap: usize) {
        if self.buckets.len() >= MAXIMUM_CAPACITY {
            return;
        }
        let old = std::mem::replace(&mut self.buckets, (0..new_cap).map(|_| None).collect());
        for mut head in old {
            while let Some(mut e) = head {
                head = e.next.take();
                let idx = (e.hash as usize) & (new_cap - 1);
                e.next = self.buckets[idx].take();
                self.buckets[idx] = Some(e);
            }
        }
    }

    fn unlink_at(&mut self, bucket: usize, depth: usize) -> Option<Box<Entry<K, V>>> {
        let mut slot = self.buckets.get_mut(bucket)?;
        for _ in 0..depth {
            slot = match slot {
                Some(e) => &mut e.next,
                None => return None,
            };
        }
        let mut removed = slot.take()?;
        *slot = removed.next.take();
        self.size -= 1;
        Some(removed)
    }

    fn fire_removed(&mut self, entry: &mut Entry<K, V>) {
        match &mut self.removed {
            Some(RemovedCallback::Simple(f)) => f(&mut entry.value),
            Some(RemovedCallback::Keyed(f)) => f(&entry.key, &mut entry.value),
            None => {}
        }
    }

    fn remove_with(&mut self, hash: u64, eq: impl FnMut(&K) -> bool) -> bool {
        match self.find_pos(hash, eq) {
            Some((bucket, depth)) => {
                if let Some(mut e) = self.unlink_at(bucket, depth) {
                    self.fire_removed(&mut e);
                    true
                } else {
                    false
                }
            }
            None => false,
        }
    }

    fn clear(&mut self) {
        for i in 0..self.buckets.len() {
            let mut head = self.buckets[i].take();
            while let Some(mut e) = head {
                head = e.next.take();
                self.fire_removed(&mut e);
            }
        }
        self.size = 0;
    }
}

impl<K, V> Drop for RawMap<K, V> {
    fn drop(&mut self) {
        // Removal callbacks also fire on destruction.
        self.clear();
    }
}

/// Borrowing iterator over a map, bucket-major then chain order.
pub struct Iter<'m, K, V> {
    buckets: &'m [Option<Box<Entry<K, V>>>],
    bucket: usize,
    chain: Option<&'m Entry<K, V>>,
}

impl<'m, K, V> Iter<'m, K, V> {
    fn new(map: &'m RawMap<K, V>) -> Self {
        Iter {
            buckets: &map.buckets,
            bucket: 0,
            chain: None,
        }
    }
}

impl<'m, K, V> Iterator for Iter<'m, K, V> {
    type Item = (&'m K, &'m V);

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(e) = self.chain {
                self.chain = e.next.as_deref();
                return Some((&e.key, &e.value));
            }
            if self.bucket >= self.buckets.len() {
                return None;
            }
            self.chain = self.buckets[self.bucket].as_deref();
            self.bucket += 1;
        }
    }
}

/// A mutable traversal position supporting removal of the current entry.
///
/// `remove` unlinks the entry the cursor points at, fires the removal
/// callback, and settles on the next entry, so a traversal can interleave
/// `next` and `remove` freely. Both are no-ops once the end is reached.
pub struct Cursor<'m, K, V> {
    map: &'m mut RawMap<K, V>,
    bucket: usize,
    depth: usize,
    index: usize,
}

impl<'m, K, V> Cursor<'m, K, V> {
    fn new(map: &'m mut RawMap<K, V>) -> Self {
        let mut cursor = Cursor {
            map,
            bucket: 0,
            depth: 0,
            index: 0,
        };
        cursor.settle();
        cursor
    }

    fn settle(&mut self) {
        while self.bucket < self.map.buckets.len() {
            if self.map.entry_at(self.bucket, self.depth).is_some() {
                return;
            }
            self.bucket += 1;
            self.depth = 0;
        }
    }

    pub fn is_end(&self) -> bool {
        self.bucket >= self.map.buckets.len()
    }

    /// Zero-based traversal index of the current entry.
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn key(&self) -> Option<&K> {
        self.map.entry_at(self.bucket, self.depth).map(|e| &e.key)
    }

    pub fn value(&self) -> Option<&V> {
        self.map.entry_at(self.bucket, self.depth).map(|e| &e.value)
    }

    pub fn value_mut(&mut self) -> Option<&mut V> {
        self.map
            .entry_at_mut(self.bucket, self.depth)
            .map(|e| &mut e.value)
    }

    pub fn next(&mut self) {
        if self.is_end() {
            return;
        }
        self.depth += 1;
        self.index += 1;
        self.settle();
    }

    pub fn remove(&mut self) {
        if self.is_end() {
            return;
        }
        let Some(mut e) = self.map.unlink_at(self.bucket, self.depth) else {
            return;
        };
        self.map.fire_removed(&mut e);
        self.index += 1;
        self.settle();
    }
}

fn hash_str(key: &str) -> u64 {
    let mut h = DefaultHasher::new();
    key.hash(&mut h);
    h.finish()
}

fn hash_long(key: i64) -> u64 {
    let k = key as u64;
    k ^ (k >> 32)
}

/// Hash map with owned string keys.
pub struct StringMap<V = Value> {
    raw: RawMap<Box<str>, V>,
}

impl<V> std::fmt::Debug for StringMap<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StringMap")
            .field("len", &self.raw.size)
            .finish()
    }
}

impl<V> StringMap<V> {
    pub fn new() -> Self {
        Self::with_options(MapOptions::default())
    }

    pub fn with_options(opts: MapOptions<Box<str>, V>) -> Self {
        StringMap {
            raw: RawMap::with_options(opts),
        }
    }

    pub fn len(&self) -> usize {
        self.raw.size
    }

    pub fn is_empty(&self) -> bool {
        self.raw.size == 0
    }

    /// Current bucket count.
    pub fn capacity(&self) -> usize {
        self.raw.buckets.len()
    }

    /// Insert or overwrite; returns the displaced value if the key was
    /// already present.
    pub fn put(&mut self, key: &str, value: V) -> Option<V> {
        let hash = hash_str(key);
        self.raw.put_with(hash, |k| &**k == key, || key.into(), value)
    }

    pub fn get(&self, key: &str) -> Option<&V> {
        let hash = hash_str(key);
        let (b, d) = self.raw.find_pos(hash, |k| &**k == key)?;
        self.raw.entry_at(b, d).map(|e| &e.value)
    }

    pub fn get_mut(&mut self, key: &str) -> Option<&mut V> {
        let hash = hash_str(key);
        let (b, d) = self.raw.find_pos(hash, |k| &**k == key)?;
        self.raw.entry_at_mut(b, d).map(|e| &mut e.value)
    }

    pub fn has_key(&self, key: &str) -> bool {
        let hash = hash_str(key);
        self.raw.find_pos(hash, |k| &**k == key).is_some()
    }

    /// Remove an entry, firing the removal callback. Returns whether an
    /// entry existed.
    pub fn remove(&mut self, key: &str) -> bool {
        let hash = hash_str(key);
        self.raw.remove_with(hash, |k| &**k == key)
    }

    /// Remove all entries, firing the removal callback for each.
    pub fn clear(&mut self) {
        self.raw.clear();
    }

    pub fn iter(&self) -> Iter<'_, Box<str>, V> {
        Iter::new(&self.raw)
    }

    pub fn cursor(&mut self) -> Cursor<'_, Box<str>, V> {
        Cursor::new(&mut self.raw)
    }
}

impl<V> Default for StringMap<V> {
    fn default() -> Self {
        Self::new()
    }
}

/// Hash map with 64-bit integer keys. The hash folds the upper half into the
/// lower one (`k ^ (k >> 32)`).
pub struct LongMap<V = Value> {
    raw: RawMap<i64, V>,
}

impl<V> LongMap<V> {
    pub fn new() -> Self {
        Self::with_options(MapOptions::default())
    }

    pub fn with_options(opts: MapOptions<i64, V>) -> Self {
        LongMap {
            raw: RawMap::with_options(opts),
        }
    }

    pub fn len(&self) -> usize {
        self.raw.size
    }

    pub fn is_empty(&self) -> bool {
        self.raw.size == 0
    }

    pub fn capacity(&self) -> usize {
        self.raw.buckets.len()
    }

    pub fn put(&mut self, key: i64, value: V) -> Option<V> {
        let hash = hash_long(key);
        self.raw.put_with(hash, |k| *k == key, || key, value)
    }

    pub fn get(&self, key: i64) -> Option<&V> {
        let hash = hash_long(key);
        let (b, d) = self.raw.find_pos(hash, |k| *k == key)?;
        self.raw.entry_at(b, d).map(|e| &e.value)
    }

    pub fn get_mut(&mut self, key: i64) -> Option<&mut V> {
        let hash = hash_long(key);
        let (b, d) = self.raw.find_pos(hash, |k| *k == key)?;
        self.raw.entry_at_mut(b, d).map(|e| &mut e.value)
    }

    pub fn has_key(&self, key: i64) -> bool {
        let hash = hash_long(key);
        self.raw.find_pos(hash, |k| *k == key).is_some()
    }

    pub fn remove(&mut self, key: i64) -> bool {
        let hash = hash_long(key);
        self.raw.remove_with(hash, |k| *k == key)
    }

    pub fn clear(&mut self) {
        self.raw.clear();
    }

    pub fn iter(&self) -> Iter<'_, i64, V> {
        Iter::new(&self.raw)
    }

    pub fn cursor(&mut self) -> Cursor<'_, i64, V> {
        Cursor::new(&mut self.raw)
    }
}

impl<V> Default for LongMap<V> {
    fn default() -> Self {
        Self::new()
    }
}

macro_rules! union_value_accessors {
    ($map:ident, $key:ty) => {
        impl $map<Value> {
            pub fn put_ptr(&mut self, key: $key, value: *mut c_void) -> Option<*mut c_void> {
                match self.put(key, Value::Ptr(value)) {
                    Some(Value::Ptr(p)) => Some(p),
                    _ => None,
                }
            }

            /// Returns whether an existing entry was overwritten.
            pub fn put_long(&mut self, key: $key, value: i64) -> bool {
                self.put(key, Value::Long(value)).is_some()
            }

            pub fn put_double(&mut self, key: $key, value: f64) -> bool {
                self.put(key, Value::Double(value)).is_some()
            }

            pub fn put_bool(&mut self, key: $key, value: bool) -> bool {
                self.put(key, Value::Bool(value)).is_some()
            }

            pub fn get_ptr(&self, key: $key) -> Option<*mut c_void> {
                match self.get(key) {
                    Some(Value::Ptr(p)) => Some(*p),
                    _ => None,
                }
            }

            pub fn get_long(&self, key: $key, fallback: i64) -> i64 {
                match self.get(key) {
                    Some(Value::Long(v)) => *v,
                    _ => fallback,
                }
            }

            pub fn get_double(&self, key: $key, fallback: f64) -> f64 {
                match self.get(key) {
                    Some(Value::Double(v)) => *v,
                    _ => fallback,
                }
            }

            pub fn get_bool(&self, key: $key, fallback: bool) -> bool {
                match self.get(key) {
                    Some(Value::Bool(v)) => *v,
                    _ => fallback,
                }
            }
        }
    };
}

union_value_accessors!(StringMap, &str);
union_value_accessors!(LongMap, i64);

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use std::rc::Rc;

    #[test]
    fn put_get_overwrite() {
        let mut map: StringMap<i32> = StringMap::new();
        assert!(map.is_empty());
        assert_eq!(map.put("a", 1), None);
        assert_eq!(map.put("b", 2), None);
        assert_eq!(map.put("a", 3), Some(1));
        assert_eq!(map.len(), 2);
        assert_eq!(map.get("a"), Some(&3));
        assert_eq!(map.get("b"), Some(&2));
        assert_eq!(map.get("c"), None);
        assert!(map.has_key("b"));
        assert!(!map.has_key("c"));
    }

    #[test]
    fn union_value_accessors() {
        let mut map = StringMap::new();
        assert!(!map.put_long("l", 42));
        assert!(map.put_long("l", 43));
        map.put_double("d", 1.5);
        map.put_bool("b", true);
        assert_eq!(map.get_long("l", -1), 43);
        assert_eq!(map.get_double("d", 0.0), 1.5);
        assert!(map.get_bool("b", false));
        assert_eq!(map.get_long("missing", -1), -1);
        assert_eq!(map.get_long("d", -1), -1);

        let mut longs = LongMap::new();
        longs.put_long(1 << 40, 7);
        assert_eq!(longs.get_long(1 << 40, 0), 7);
        assert!(longs.has_key(1 << 40));
    }

    #[test]
    fn grows_past_load_factor() {
        let mut map: LongMap<i64> = LongMap::with_options(MapOptions {
            initial_capacity: 4,
            ..MapOptions::default()
        });
        assert_eq!(map.capacity(), 4);
        for i in 0..100 {
            map.put(i, i);
        }
        assert_eq!(map.len(), 100);
        assert!(map.capacity() >= 128);
        assert!(map.capacity().is_power_of_two());
        for i in 0..100 {
            assert_eq!(map.get(i), Some(&i));
        }
    }

    #[test]
    fn removal_callback_fires_exactly_n_times() {
        let hits = Rc::new(Cell::new(0));
        let counter = Rc::clone(&hits);
        let mut map: StringMap<i64> = StringMap::with_options(MapOptions {
            removed: Some(RemovedCallback::Keyed(Box::new(move |_k, _v| {
                counter.set(counter.get() + 1);
            }))),
            ..MapOptions::default()
        });
        let n = 25;
        for i in 0..n {
            map.put(&format!("key{i}"), i);
        }
        for i in 0..n {
            assert!(map.remove(&format!("key{i}")));
        }
        assert!(!map.remove("key0"));
        assert_eq!(map.len(), 0);
        assert_eq!(hits.get(), n as i32);
    }

    #[test]
    fn callback_fires_on_clear_and_drop() {
        let hits = Rc::new(Cell::new(0));
        let counter = Rc::clone(&hits);
        let mut map: LongMap<()> = LongMap::with_options(MapOptions {
            removed: Some(RemovedCallback::Simple(Box::new(move |_v| {
                counter.set(counter.get() + 1);
            }))),
            ..MapOptions::default()
        });
        for i in 0..5 {
            map.put(i, ());
        }
        map.clear();
        assert_eq!(hits.get(), 5);
        for i in 0..3 {
            map.put(i, ());
        }
        drop(map);
        assert_eq!(hits.get(), 8);
    }

    #[test]
    fn iteration_visits_each_entry_once() {
        let mut map: StringMap<i64> = StringMap::new();
        for i in 0..40 {
            map.put(&format!("key{i}"), i);
        }
        let mut seen = vec![false; 40];
        for (k, v) in map.iter() {
            assert_eq!(&**k, format!("key{v}"));
            assert!(!seen[*v as usize], "visited {k} twice");
            seen[*v as usize] = true;
        }
        assert!(seen.iter().all(|s| *s));
    }

    #[test]
    fn iteration_order_is_stable_without_mutation() {
        let mut map: LongMap<i64> = LongMap::new();
        for i in 0..20 {
            map.put(i * 31, i);
        }
        let first: Vec<i64> = map.iter().map(|(k, _)| *k).collect();
        let second: Vec<i64> = map.iter().map(|(k, _)| *k).collect();
        assert_eq!(first, second);
    }

    #[test]
    fn cursor_remove_interleaved() {
        // Insert key0..key5, remove the entries seen at even traversal
        // indices, keep the rest.
        let mut map = StringMap::new();
        for i in 0..6 {
            map.put_long(&format!("key{i}"), i);
        }
        let mut cursor = map.cursor();
        while !cursor.is_end() {
            if cursor.index() % 2 == 0 {
                cursor.remove();
            } else {
                cursor.next();
            }
        }
        assert!(cursor.is_end());
        cursor.next(); // no-op at end
        assert!(cursor.is_end());
        drop(cursor);
        assert_eq!(map.len(), 3);
    }

    #[test]
    fn cursor_remove_all() {
        let mut map: LongMap<i64> = LongMap::new();
        for i in 0..32 {
            map.put(i, i);
        }
        let mut cursor = map.cursor();
        while !cursor.is_end() {
            cursor.remove();
        }
        drop(cursor);
        assert_eq!(map.len(), 0);
        assert_eq!(map.iter().count(), 0);
    }
}
