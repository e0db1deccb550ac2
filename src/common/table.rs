// Axol compiler hash table
// Changelog:
// 2026-03-03: Open-addressing table with linear probing, keyed by interned string pointers;
//            used for globals, instance fields, method tables and the intern set itself.
//            Deletion leaves a tombstone (null key + true) so probe chains stay intact;
//            count includes tombstones, which keeps the load factor honest.
// 2026-03-09: Added find_string (content lookup for interning) and remove_white (the intern
//            set holds its keys weakly, dead strings are dropped before the sweep).

use crate::common::object::{GCObject, StringObj};
use crate::common::value::Value;

const TABLE_MAX_LOAD_NUM: usize = 3;
const TABLE_MAX_LOAD_DEN: usize = 4;

#[derive(Debug, Clone, Copy)]
pub struct Entry {
    pub key: *mut GCObject<StringObj>,
    pub value: Value,
}

impl Entry {
    fn empty() -> Self {
        Self {
            key: std::ptr::null_mut(),
            value: Value::Nil,
        }
    }

    fn is_tombstone(&self) -> bool {
        self.key.is_null() && !matches!(self.value, Value::Nil)
    }
}

pub struct Table {
    pub count: usize,
    pub entries: Vec<Entry>,
}

fn grow_capacity(capacity: usize) -> usize {
    if capacity < 8 { 8 } else { capacity * 2 }
}

/// Probe for `key`, remembering the first tombstone passed. Stops at the first
/// truly empty slot (returning the tombstone instead, if any, so inserts reuse it)
/// or at the matching key.
fn find_entry(entries: &[Entry], key: *mut GCObject<StringObj>) -> usize {
    let capacity = entries.len();
    let mut index = unsafe { (*key).data.hash } as usize % capacity;
    let mut tombstone: Option<usize> = None;

    loop {
        let entry = &entries[index];
        if entry.key.is_null() {
            if !entry.is_tombstone() {
                return tombstone.unwrap_or(index);
            }
            if tombstone.is_none() {
                tombstone = Some(index);
            }
        } else if entry.key == key {
            return index;
        }

        index = (index + 1) % capacity;
    }
}

impl Table {
    pub fn new() -> Self {
        Self {
            count: 0,
            entries: Vec::new(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.entries.len()
    }

    fn adjust_capacity(&mut self, capacity: usize) {
        let mut entries = vec![Entry::empty(); capacity];

        // 重新散列时丢弃墓碑，count 重新计数
        self.count = 0;
        for entry in &self.entries {
            if entry.key.is_null() {
                continue;
            }

            let dest = find_entry(&entries, entry.key);
            entries[dest] = *entry;
            self.count += 1;
        }

        self.entries = entries;
    }

    /// Insert or overwrite. Returns true when the key was not present before.
    pub fn set(&mut self, key: *mut GCObject<StringObj>, value: Value) -> bool {
        if (self.count + 1) * TABLE_MAX_LOAD_DEN > self.capacity() * TABLE_MAX_LOAD_NUM {
            let capacity = grow_capacity(self.capacity());
            self.adjust_capacity(capacity);
        }

        let index = find_entry(&self.entries, key);
        let entry = &mut self.entries[index];
        let is_new = entry.key.is_null();
        if is_new && !entry.is_tombstone() {
            self.count += 1;
        }

        entry.key = key;
        entry.value = value;
        is_new
    }

    pub fn get(&self, key: *mut GCObject<StringObj>) -> Option<Value> {
        if self.count == 0 {
            return None;
        }

        let entry = &self.entries[find_entry(&self.entries, key)];
        if entry.key.is_null() {
            return None;
        }

        Some(entry.value)
    }

    /// Tombstone the entry; the slot stays counted for load-factor purposes.
    pub fn delete(&mut self, key: *mut GCObject<StringObj>) -> bool {
        if self.count == 0 {
            return false;
        }

        let index = find_entry(&self.entries, key);
        let entry = &mut self.entries[index];
        if entry.key.is_null() {
            return false;
        }

        entry.key = std::ptr::null_mut();
        entry.value = Value::Boolean(true);
        true
    }

    /// Content-based lookup used only by the intern set: equal bytes, not equal pointers.
    pub fn find_string(&self, data: &str, hash: u32) -> *mut GCObject<StringObj> {
        if self.count == 0 {
            return std::ptr::null_mut();
        }

        let capacity = self.capacity();
        let mut index = hash as usize % capacity;
        loop {
            let entry = &self.entries[index];
            if entry.key.is_null() {
                if !entry.is_tombstone() {
                    return std::ptr::null_mut();
                }
            } else {
                let key = unsafe { &(*entry.key).data };
                if key.hash == hash && key.data == data {
                    return entry.key;
                }
            }

            index = (index + 1) % capacity;
        }
    }

    /// Drop every entry whose key did not survive the mark phase. Run on the
    /// intern set after marking and before the sweep frees the keys.
    pub fn remove_white(&mut self) {
        for entry in &mut self.entries {
            if !entry.key.is_null() && unsafe { !(*entry.key).mark } {
                entry.key = std::ptr::null_mut();
                entry.value = Value::Boolean(true);
            }
        }
    }
}

impl Default for Table {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::object::{ObjectKind, hash_string};

    // 测试用：手工构造一个不归 GC 管的字符串对象
    fn make_string(s: &str) -> *mut GCObject<StringObj> {
        Box::into_raw(Box::new(GCObject {
            mark: false,
            kind: ObjectKind::String,
            size: 0,
            next: std::ptr::null_mut(),
            data: StringObj {
                data: s.to_string(),
                hash: hash_string(s),
            },
        }))
    }

    #[test]
    fn set_then_get_roundtrip() {
        let mut table = Table::new();
        let key = make_string("answer");

        assert!(table.set(key, Value::Number(42.0)));
        assert_eq!(table.get(key), Some(Value::Number(42.0)));

        // overwrite is not a new insert
        assert!(!table.set(key, Value::Number(7.0)));
        assert_eq!(table.get(key), Some(Value::Number(7.0)));
    }

    #[test]
    fn delete_leaves_reusable_tombstone() {
        let mut table = Table::new();
        let a = make_string("a");
        let b = make_string("b");

        table.set(a, Value::Number(1.0));
        table.set(b, Value::Number(2.0));
        assert!(table.delete(a));
        assert!(!table.delete(a));
        assert_eq!(table.get(a), None);
        assert_eq!(table.get(b), Some(Value::Number(2.0)));

        let count_before = table.count;
        table.set(a, Value::Number(3.0));
        // the tombstone slot was reused, count must not grow
        assert_eq!(table.count, count_before);
        assert_eq!(table.get(a), Some(Value::Number(3.0)));
    }

    #[test]
    fn growth_preserves_entries() {
        let mut table = Table::new();
        let keys: Vec<_> = (0..32).map(|i| make_string(&format!("key_{}", i))).collect();

        for (i, key) in keys.iter().enumerate() {
            table.set(*key, Value::Number(i as f64));
        }

        assert!(table.capacity() >= 32);
        for (i, key) in keys.iter().enumerate() {
            assert_eq!(table.get(*key), Some(Value::Number(i as f64)));
        }
    }

    #[test]
    fn find_string_matches_by_content() {
        let mut table = Table::new();
        let key = make_string("shared");
        table.set(key, Value::Nil);

        let hash = hash_string("shared");
        assert_eq!(table.find_string("shared", hash), key);
        assert!(table.find_string("other", hash_string("other")).is_null());
    }
}
