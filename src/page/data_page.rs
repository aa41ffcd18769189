// A value may be present-but-null (Entry.value == None), distinct from
// "key not present at all", so most operations here return
// Option<Option<V>>: outer is presence, inner is the stored value.

use crate::codec::Codec;
use crate::error::Error;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry<K, V> {
    pub key: K,
    pub value: Option<V>,
}

// separator = None marks the last pointer in a page: every key greater
// than or equal to the previous separator routes here.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pointer<K> {
    pub separator: Option<K>,
    pub page_id: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataPage<K, V> {
    pub id: u64,
    is_leaf: bool,
    entries: Vec<Entry<K, V>>,
    pointers: Vec<Pointer<K>>,
}

// Insertion point in the page's sorted key axis, and whether it's exact.
pub type ChildIndex = (usize, bool);

impl<K: Ord + Clone, V: Clone> DataPage<K, V> {
    pub fn new_leaf(id: u64) -> Self {
        Self {
            id,
            is_leaf: true,
            entries: Vec::new(),
            pointers: Vec::new(),
        }
    }

    pub fn new_internal(id: u64, pointers: Vec<Pointer<K>>) -> Self {
        Self {
            id,
            is_leaf: false,
            entries: Vec::new(),
            pointers,
        }
    }

    pub fn is_leaf(&self) -> bool {
        self.is_leaf
    }

    pub fn entries(&self) -> &[Entry<K, V>] {
        &self.entries
    }

    pub fn entries_mut(&mut self) -> &mut Vec<Entry<K, V>> {
        &mut self.entries
    }

    pub fn pointers(&self) -> &[Pointer<K>] {
        &self.pointers
    }

    pub fn pointers_mut(&mut self) -> &mut Vec<Pointer<K>> {
        &mut self.pointers
    }

    pub fn set_entries(&mut self, entries: Vec<Entry<K, V>>) {
        self.entries = entries;
    }

    pub fn set_pointers(&mut self, pointers: Vec<Pointer<K>>) {
        self.pointers = pointers;
    }

    // entries for a leaf, pointers for an internal page.
    pub fn slot_count(&self) -> usize {
        if self.is_leaf {
            self.entries.len()
        } else {
            self.pointers.len()
        }
    }

    // Binary search over the sorted key axis: entries for a leaf,
    // separators for an internal page. Empty pages return (0, false).
    pub fn child_index(&self, key: &K) -> ChildIndex {
        if self.is_leaf {
            match self.entries.binary_search_by(|e| e.key.cmp(key)) {
                Ok(i) => (i, true),
                Err(i) => (i, false),
            }
        } else {
            // Only the non-null separators participate in the ordering;
            // the trailing null-separator pointer is never a search target.
            let separators = &self.pointers[..self.pointers.len().saturating_sub(1)];
            match separators.binary_search_by(|p| {
                p.separator
                    .as_ref()
                    .expect("non-terminal pointer must have a separator")
                    .cmp(key)
            }) {
                Ok(i) => (i, true),
                Err(i) => (i, false),
            }
        }
    }

    // Leaf-only. Overwrites the value if key is already present, else
    // inserts it at the index child_index would report.
    pub fn upsert_entry(&mut self, key: K, value: Option<V>) {
        debug_assert!(self.is_leaf, "upsert_entry called on an internal page");
        let (index, found) = self.child_index(&key);
        if found {
            self.entries[index].value = value;
        } else {
            self.entries.insert(index, Entry { key, value });
        }
    }

    // Leaf-only. Removes key if present, returning its stored value.
    pub fn delete_entry(&mut self, key: &K) -> Option<Option<V>> {
        debug_assert!(self.is_leaf, "delete_entry called on an internal page");
        let (index, found) = self.child_index(key);
        if found {
            Some(self.entries.remove(index).value)
        } else {
            None
        }
    }
}

impl<K: Codec, V: Codec> DataPage<K, V> {
    // [is_leaf, payload...]: payload is a flat sequence of (K, V) pairs
    // for a leaf, or (K?, page_id) pairs for an internal page.
    pub fn encode_body(&self, out: &mut Vec<u8>) {
        self.is_leaf.encode(out);
        if self.is_leaf {
            for e in &self.entries {
                e.key.encode(out);
                e.value.encode(out);
            }
        } else {
            for p in &self.pointers {
                p.separator.encode(out);
                p.page_id.encode(out);
            }
        }
    }

    // Consumes buf until exhausted: self-delimiting fields plus a known
    // total length is all the framing a flat sequence needs.
    pub fn decode_body(id: u64, mut buf: &[u8]) -> Result<Self, Error> {
        let (is_leaf, used) = bool::decode(buf)?;
        buf = &buf[used..];

        if is_leaf {
            let mut entries = Vec::new();
            while !buf.is_empty() {
                let (key, used) = K::decode(buf)?;
                buf = &buf[used..];
                let (value, used) = Option::<V>::decode(buf)?;
                buf = &buf[used..];
                entries.push(Entry { key, value });
            }
            Ok(Self {
                id,
                is_leaf: true,
                entries,
                pointers: Vec::new(),
            })
        } else {
            let mut pointers = Vec::new();
            while !buf.is_empty() {
                let (separator, used) = Option::<K>::decode(buf)?;
                buf = &buf[used..];
                let (page_id, used) = u64::decode(buf)?;
                buf = &buf[used..];
                pointers.push(Pointer { separator, page_id });
            }
            Ok(Self {
                id,
                is_leaf: false,
                entries: Vec::new(),
                pointers,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn child_index_on_empty_leaf() {
        let page: DataPage<u32, u32> = DataPage::new_leaf(0);
        assert_eq!(page.child_index(&5), (0, false));
    }

    #[test]
    fn upsert_inserts_in_sorted_order() {
        let mut page: DataPage<u32, u32> = DataPage::new_leaf(0);
        page.upsert_entry(5, Some(50));
        page.upsert_entry(1, Some(10));
        page.upsert_entry(3, Some(30));
        let keys: Vec<_> = page.entries().iter().map(|e| e.key).collect();
        assert_eq!(keys, vec![1, 3, 5]);
    }

    #[test]
    fn upsert_overwrites_existing_key() {
        let mut page: DataPage<u32, u32> = DataPage::new_leaf(0);
        page.upsert_entry(1, Some(10));
        page.upsert_entry(1, Some(99));
        assert_eq!(page.entries()[0].value, Some(99));
    }

    #[test]
    fn upsert_with_null_value_is_distinct_from_absent() {
        let mut page: DataPage<u32, u32> = DataPage::new_leaf(0);
        page.upsert_entry(1, None);
        assert_eq!(page.delete_entry(&1), Some(None));
        assert_eq!(page.delete_entry(&1), None);
    }

    #[test]
    fn delete_entry_removes_and_returns_value() {
        let mut page: DataPage<u32, u32> = DataPage::new_leaf(0);
        page.upsert_entry(1, Some(10));
        assert_eq!(page.delete_entry(&1), Some(Some(10)));
        assert!(page.entries().is_empty());
    }

    #[test]
    fn child_index_on_internal_skips_null_separator() {
        let page: DataPage<u32, u32> = DataPage::new_internal(
            0,
            vec![
                Pointer {
                    separator: Some(10),
                    page_id: 1,
                },
                Pointer {
                    separator: Some(20),
                    page_id: 2,
                },
                Pointer {
                    separator: None,
                    page_id: 3,
                },
            ],
        );
        assert_eq!(page.child_index(&10), (0, true));
        assert_eq!(page.child_index(&15), (1, false));
        assert_eq!(page.child_index(&1000), (2, false));
    }

    #[test]
    fn leaf_body_roundtrips() {
        let mut page: DataPage<u32, u32> = DataPage::new_leaf(7);
        page.upsert_entry(1, Some(10));
        page.upsert_entry(2, None);
        let mut buf = Vec::new();
        page.encode_body(&mut buf);
        let decoded = DataPage::<u32, u32>::decode_body(7, &buf).unwrap();
        assert_eq!(decoded, page);
    }

    #[test]
    fn internal_body_roundtrips() {
        let page: DataPage<u32, u32> = DataPage::new_internal(
            7,
            vec![
                Pointer {
                    separator: Some(5),
                    page_id: 1,
                },
                Pointer {
                    separator: None,
                    page_id: 2,
                },
            ],
        );
        let mut buf = Vec::new();
        page.encode_body(&mut buf);
        let decoded = DataPage::<u32, u32>::decode_body(7, &buf).unwrap();
        assert_eq!(decoded, page);
    }
}
