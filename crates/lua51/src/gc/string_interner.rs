// String interner - every string in a state is interned
//
// The invariant: no two live string objects in one state have equal
// contents. Lookup hashes with ahash and walks the bucket comparing
// bytes, so hash collisions still yield distinct objects for distinct
// contents. The sweep phase tells the interner which ids died so the
// buckets never hold stale ids.

use ahash::RandomState;
use std::collections::HashMap;
use std::hash::{BuildHasher, Hash, Hasher};

use crate::gc::object_pool::{Arena, GcHeader, GcString, StringId};
use crate::lua_value::LuaString;

pub struct StringInterner {
    /// Content hash -> candidate ids. Buckets are tiny; collisions on
    /// hash but not content simply share a bucket.
    map: HashMap<u64, Vec<StringId>, RandomState>,
    hash_builder: RandomState,
}

impl StringInterner {
    pub fn new() -> Self {
        Self {
            map: HashMap::with_capacity_and_hasher(256, RandomState::new()),
            hash_builder: RandomState::new(),
        }
    }

    /// Return the existing id for byte-equal content, or allocate a new
    /// string in `strings` and remember it.
    pub fn intern(&mut self, s: &str, strings: &mut Arena<GcString>) -> (StringId, bool) {
        let hash = self.hash_str(s);
        if let Some(ids) = self.map.get(&hash) {
            for &id in ids {
                if let Some(gs) = strings.get(id.0) {
                    if gs.data.as_str() == s {
                        return (id, false);
                    }
                }
            }
        }
        let id = StringId(strings.alloc(GcString {
            header: GcHeader::default(),
            data: LuaString::new(s.to_string(), hash),
        }));
        self.map.entry(hash).or_default().push(id);
        (id, true)
    }

    #[inline(always)]
    fn hash_str(&self, s: &str) -> u64 {
        let mut hasher = self.hash_builder.build_hasher();
        s.hash(&mut hasher);
        hasher.finish()
    }

    /// Drop a swept string from its bucket.
    pub fn remove_dead(&mut self, id: StringId, hash: u64) {
        if let Some(ids) = self.map.get_mut(&hash) {
            ids.retain(|&i| i != id);
            if ids.is_empty() {
                self.map.remove(&hash);
            }
        }
    }
}

impl Default for StringInterner {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_equal_bytes_share_one_object() {
        let mut arena = Arena::new();
        let mut interner = StringInterner::new();
        let (a, fresh_a) = interner.intern("hello", &mut arena);
        let (b, fresh_b) = interner.intern("hello", &mut arena);
        assert_eq!(a, b);
        assert!(fresh_a);
        assert!(!fresh_b);
        assert_eq!(arena.len(), 1);
    }

    #[test]
    fn test_distinct_bytes_distinct_objects() {
        let mut arena = Arena::new();
        let mut interner = StringInterner::new();
        let (a, _) = interner.intern("abc", &mut arena);
        let (b, _) = interner.intern("abd", &mut arena);
        assert_ne!(a, b);
        assert_eq!(arena.len(), 2);
    }

    #[test]
    fn test_removed_id_is_reallocatable() {
        let mut arena = Arena::new();
        let mut interner = StringInterner::new();
        let (a, _) = interner.intern("gone", &mut arena);
        let hash = arena.get(a.0).unwrap().data.hash();
        arena.free(a.0);
        interner.remove_dead(a, hash);
        let (b, fresh) = interner.intern("gone", &mut arena);
        assert!(fresh);
        assert_eq!(arena.len(), 1);
        let _ = b;
    }
}
