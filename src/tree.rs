use std::cell::Cell;

use crate::codec::Codec;
use crate::error::{Error, Result};
use crate::page::{load_data_page, load_meta_page, DataPage, MetaPage, Page, Pointer};

// Non-root pages must stay at or above max_page_size / FILL_FACTOR bytes;
// the root is exempt. Fixed at 4, not a configurable knob.
pub const FILL_FACTOR: usize = 4;

// StorageDriver is the production implementation; the driver's own
// id-map and free-map sub-trees are driven by a bypass adapter that
// talks straight to the raw block store instead.
pub trait PageDriver {
    fn max_page_size(&self) -> usize;
    fn get_metadata(&self) -> Result<Option<Vec<u8>>>;
    fn put_metadata(&self, bytes: Vec<u8>) -> Result<()>;
    fn get(&self, id: u64) -> Result<Option<Vec<u8>>>;
    fn put(&self, id: u64, bytes: Vec<u8>) -> Result<()>;
    fn free(&self, id: u64) -> Result<()>;
    // Mints a fresh id for a brand-new page. Returned ids are external
    // ids, see the driver module.
    fn allocate(&self) -> Result<u64>;
    fn generator(&self) -> Result<Vec<(u64, Vec<u8>)>>;
}

// One step of the descent path. No parent pointers are kept in pages
// themselves, this stack is the only record of how a mutation reached
// its leaf.
#[derive(Debug, Clone)]
struct PathElem<K, V> {
    page: DataPage<K, V>,
    index: usize,
    found: bool,
}

impl<K, V> PathElem<K, V> {
    // The pointer slot actually taken during descent: index adjusted by
    // the found/not-found tie-break (an exact separator match routes to
    // the pointer to its right).
    fn chosen_index(&self) -> usize {
        self.index + if self.found { 1 } else { 0 }
    }
}

pub struct BPlusTree<D, K, V> {
    driver: D,
    busy: Cell<bool>,
    _marker: std::marker::PhantomData<(K, V)>,
}

impl<D: PageDriver, K: Ord + Clone + Codec, V: Clone + Codec> BPlusTree<D, K, V> {
    pub fn open(driver: D) -> Self {
        Self {
            driver,
            busy: Cell::new(false),
            _marker: std::marker::PhantomData,
        }
    }

    fn guard_busy<T>(&self, f: impl FnOnce(&Self) -> Result<T>) -> Result<T> {
        if self.busy.get() {
            return Err(Error::Busy);
        }
        self.busy.set(true);
        let result = f(self);
        self.busy.set(false);
        result
    }

    #[cfg(test)]
    pub(crate) fn set_busy_for_test(&self, busy: bool) {
        self.busy.set(busy);
    }

    fn current_root_id(&self) -> Result<Option<u64>> {
        match self.driver.get_metadata()? {
            Some(bytes) => Ok(Some(load_meta_page::<K, V>(&bytes)?.root_id)),
            None => Ok(None),
        }
    }

    fn is_root(&self, page_id: u64) -> Result<bool> {
        Ok(self.current_root_id()?.is_some_and(|r| r == page_id))
    }

    fn write_metadata(&self, root_id: u64) -> Result<()> {
        let meta = MetaPage { id: 0, root_id };
        self.driver.put_metadata(Page::<K, V>::Meta(meta).encode())
    }

    fn load_page(&self, id: u64) -> Result<DataPage<K, V>> {
        let bytes = self
            .driver
            .get(id)?
            .ok_or_else(|| Error::Corrupt(format!("missing page {id}")))?;
        load_data_page::<K, V>(&bytes)
    }

    fn page_len(page: &DataPage<K, V>) -> usize {
        Page::Data(page.clone()).encode().len()
    }

    // Allocates and publishes an empty leaf root the first time the tree
    // is touched.
    fn root_page(&self) -> Result<DataPage<K, V>> {
        match self.current_root_id()? {
            Some(id) => self.load_page(id),
            None => {
                let id = self.driver.allocate()?;
                let leaf: DataPage<K, V> = DataPage::new_leaf(id);
                self.driver.put(id, Page::Data(leaf.clone()).encode())?;
                self.write_metadata(id)?;
                log::debug!("bootstrapped empty root leaf page {id}");
                Ok(leaf)
            }
        }
    }

    // At each internal page, a separator equal to the search key routes
    // right of that separator (internal keys are lower bounds on the
    // right subtree).
    fn find_leaf(&self, key: &K) -> Result<(DataPage<K, V>, Vec<PathElem<K, V>>)> {
        let mut page = self.root_page()?;
        let mut path = Vec::new();
        while !page.is_leaf() {
            let (index, found) = page.child_index(key);
            let elem = PathElem {
                page: page.clone(),
                index,
                found,
            };
            let child_id = elem.page.pointers()[elem.chosen_index()].page_id;
            path.push(elem);
            page = self.load_page(child_id)?;
        }
        Ok((page, path))
    }

    // Ok(None) if the key is absent, Ok(Some(v)) if present, where v is
    // itself Option<V> since a stored value may be present-but-null.
    pub fn find(&self, key: &K) -> Result<Option<Option<V>>> {
        let (leaf, _) = self.find_leaf(key)?;
        let (index, found) = leaf.child_index(key);
        if found {
            Ok(Some(leaf.entries()[index].value.clone()))
        } else {
            Ok(None)
        }
    }

    // Smallest stored key >= key, i.e. key itself if present, else the
    // next key in order. Absent only if key exceeds every stored key,
    // including the case where the root is a leaf with no ancestor path
    // to climb looking for a right-hand subtree.
    pub fn find_next(&self, key: &K) -> Result<Option<K>> {
        let (leaf, mut path) = self.find_leaf(key)?;
        let (index, found) = leaf.child_index(key);
        if found {
            return Ok(Some(key.clone()));
        }
        if index < leaf.entries().len() {
            return Ok(Some(leaf.entries()[index].key.clone()));
        }

        while let Some(elem) = path.pop() {
            let next_index = elem.chosen_index() + 1;
            if next_index < elem.page.pointers().len() {
                let mut page = self.load_page(elem.page.pointers()[next_index].page_id)?;
                while !page.is_leaf() {
                    let first_child = page.pointers()[0].page_id;
                    page = self.load_page(first_child)?;
                }
                return Ok(page.entries().first().map(|e| e.key.clone()));
            }
        }
        Ok(None)
    }

    // value = None stores an explicit null distinct from the key being
    // absent.
    pub fn add(&self, key: K, value: Option<V>) -> Result<()> {
        self.guard_busy(|this| {
            let (mut leaf, path) = this.find_leaf(&key)?;
            leaf.upsert_entry(key, value);
            this.store_page(leaf, path)
        })
    }

    // Some(None) if the stored value was itself null, None if the key
    // was absent.
    pub fn delete(&self, key: &K) -> Result<Option<Option<V>>> {
        self.guard_busy(|this| {
            let (mut leaf, path) = this.find_leaf(key)?;
            let removed = leaf.delete_entry(key);
            if removed.is_some() {
                this.store_page(leaf, path)?;
            }
            Ok(removed)
        })
    }

    // Dispatches every write: plain write, split, root collapse, or
    // underflow, in that priority order.
    fn store_page(&self, page: DataPage<K, V>, path: Vec<PathElem<K, V>>) -> Result<()> {
        let max_size = self.driver.max_page_size();
        let encoded_len = Self::page_len(&page);
        let is_root = self.is_root(page.id)?;

        if encoded_len > max_size {
            log::trace!("page {} overflowed ({encoded_len} > {max_size}), splitting", page.id);
            self.split(page, path)
        } else if is_root && !page.is_leaf() && page.pointers().len() == 1 {
            self.collapse_root(page)
        } else if !is_root && encoded_len < max_size / FILL_FACTOR {
            log::trace!(
                "page {} underflowed ({encoded_len} < {}), rebalancing",
                page.id,
                max_size / FILL_FACTOR
            );
            self.underflow(page, path)
        } else {
            self.driver.put(page.id, Page::Data(page).encode())
        }
    }

    fn collapse_root(&self, mut root: DataPage<K, V>) -> Result<()> {
        let only_child = root.pointers_mut().pop().expect("checked len == 1");
        self.driver.free(root.id)?;
        log::debug!("collapsed root {} into sole child {}", root.id, only_child.page_id);
        self.write_metadata(only_child.page_id)
    }

    // ---- split ----------------------------------------------------------

    fn split(&self, mut page: DataPage<K, V>, path: Vec<PathElem<K, V>>) -> Result<()> {
        let promoted_key;
        let right_id = self.driver.allocate()?;

        if page.is_leaf() {
            let mut entries = page.entries().to_vec();
            let mid = entries.len() / 2;
            let right_entries = entries.split_off(mid);
            promoted_key = right_entries
                .first()
                .expect("non-empty overflowed leaf")
                .key
                .clone();
            page.set_entries(entries);

            let mut right_page: DataPage<K, V> = DataPage::new_leaf(right_id);
            right_page.set_entries(right_entries);
            self.driver.put(right_id, Page::Data(right_page).encode())?;
        } else {
            let mut pointers = page.pointers().to_vec();
            let mid = (pointers.len() - 1) / 2;
            let mut upper = pointers.split_off(mid);
            let promoted = upper.remove(0);
            promoted_key = promoted.separator.ok_or_else(|| {
                Error::Corrupt("internal split midpoint has a null separator".to_string())
            })?;

            pointers.push(Pointer {
                separator: None,
                page_id: promoted.page_id,
            });
            page.set_pointers(pointers);

            let right_page: DataPage<K, V> = DataPage::new_internal(right_id, upper);
            self.driver.put(right_id, Page::Data(right_page).encode())?;
        }

        let left_id = page.id;
        self.driver.put(left_id, Page::Data(page).encode())?;
        log::debug!("split page {left_id} into ({left_id}, {right_id})");
        self.propagate_split(left_id, promoted_key, right_id, path)
    }

    fn propagate_split(
        &self,
        left_id: u64,
        promoted_key: K,
        right_id: u64,
        mut path: Vec<PathElem<K, V>>,
    ) -> Result<()> {
        match path.pop() {
            None => {
                let root_id = self.driver.allocate()?;
                let new_root: DataPage<K, V> = DataPage::new_internal(
                    root_id,
                    vec![
                        Pointer {
                            separator: Some(promoted_key),
                            page_id: left_id,
                        },
                        Pointer {
                            separator: None,
                            page_id: right_id,
                        },
                    ],
                );
                self.driver.put(root_id, Page::Data(new_root).encode())?;
                log::debug!("grew new root {root_id} over ({left_id}, {right_id})");
                self.write_metadata(root_id)
            }
            Some(parent_elem) => {
                let mut parent = parent_elem.page;
                let child_index = parent_elem.chosen_index();
                let mut pointers = parent.pointers().to_vec();
                debug_assert_eq!(pointers[child_index].page_id, left_id);
                pointers.insert(
                    child_index,
                    Pointer {
                        separator: Some(promoted_key),
                        page_id: left_id,
                    },
                );
                pointers[child_index + 1].page_id = right_id;
                parent.set_pointers(pointers);
                self.store_page(parent, path)
            }
        }
    }

    // ---- underflow --------------------------------------------------------

    fn underflow(&self, page: DataPage<K, V>, mut path: Vec<PathElem<K, V>>) -> Result<()> {
        let parent_elem = path
            .pop()
            .ok_or_else(|| Error::Corrupt("underflow with no parent on path".to_string()))?;
        let mut parent = parent_elem.page;
        let child_index = parent_elem.chosen_index();
        let pointer_count = parent.pointers().len();

        let has_upper = child_index + 1 < pointer_count;
        let has_lower = child_index > 0;
        if !has_upper && !has_lower {
            return Err(Error::Corrupt(
                "underflowing non-root page has no sibling".to_string(),
            ));
        }

        let (lower, upper, lower_idx) = if has_upper {
            let upper_id = parent.pointers()[child_index + 1].page_id;
            let upper = self.load_page(upper_id)?;
            (page, upper, child_index)
        } else {
            let lower_id = parent.pointers()[child_index - 1].page_id;
            let lower = self.load_page(lower_id)?;
            (lower, page, child_index - 1)
        };

        self.rebalance_or_merge(lower, upper, &mut parent, lower_idx)?;
        self.store_page(parent, path)
    }

    fn rebalance_or_merge(
        &self,
        mut lower: DataPage<K, V>,
        mut upper: DataPage<K, V>,
        parent: &mut DataPage<K, V>,
        lower_idx: usize,
    ) -> Result<()> {
        let min_size = self.driver.max_page_size() / FILL_FACTOR;

        while Self::page_len(&lower) < min_size && Self::page_len(&upper) >= min_size {
            if upper.slot_count() <= 1 {
                break;
            }
            Self::move_upper_head_to_lower_tail(&mut lower, &mut upper, parent, lower_idx);
        }
        while Self::page_len(&upper) < min_size && Self::page_len(&lower) >= min_size {
            if lower.slot_count() <= 1 {
                break;
            }
            Self::move_lower_tail_to_upper_head(&mut lower, &mut upper, parent, lower_idx);
        }

        let lower_deficient = Self::page_len(&lower) < min_size;
        let upper_deficient = Self::page_len(&upper) < min_size;
        let reduced_to_single_child = (!lower.is_leaf() && lower.pointers().len() < 2)
            || (!upper.is_leaf() && upper.pointers().len() < 2);

        if lower_deficient || upper_deficient || reduced_to_single_child {
            self.merge(lower, upper, parent, lower_idx)
        } else {
            log::trace!("rebalanced siblings {} / {}", lower.id, upper.id);
            self.driver.put(lower.id, Page::Data(lower).encode())?;
            self.driver.put(upper.id, Page::Data(upper).encode())
        }
    }

    fn move_upper_head_to_lower_tail(
        lower: &mut DataPage<K, V>,
        upper: &mut DataPage<K, V>,
        parent: &mut DataPage<K, V>,
        lower_idx: usize,
    ) {
        if lower.is_leaf() {
            let entry = upper.entries_mut().remove(0);
            lower.entries_mut().push(entry);
            let new_boundary = upper.entries().first().map(|e| e.key.clone());
            parent.pointers_mut()[lower_idx].separator = new_boundary;
        } else {
            let old_parent_sep = parent.pointers()[lower_idx].separator.clone();
            let moved = upper.pointers_mut().remove(0);
            let last_idx = lower.pointers().len() - 1;
            lower.pointers_mut()[last_idx].separator = old_parent_sep;
            lower.pointers_mut().push(Pointer {
                separator: None,
                page_id: moved.page_id,
            });
            parent.pointers_mut()[lower_idx].separator = moved.separator;
        }
    }

    fn move_lower_tail_to_upper_head(
        lower: &mut DataPage<K, V>,
        upper: &mut DataPage<K, V>,
        parent: &mut DataPage<K, V>,
        lower_idx: usize,
    ) {
        if lower.is_leaf() {
            let entry = lower.entries_mut().pop().expect("non-empty lower leaf");
            let boundary = entry.key.clone();
            upper.entries_mut().insert(0, entry);
            parent.pointers_mut()[lower_idx].separator = Some(boundary);
        } else {
            let old_parent_sep = parent.pointers()[lower_idx].separator.clone();
            let moved = lower.pointers_mut().pop().expect("non-empty lower internal");
            let new_last_idx = lower.pointers().len() - 1;
            let promoted = lower.pointers()[new_last_idx].separator.clone();
            lower.pointers_mut()[new_last_idx].separator = None;
            upper.pointers_mut().insert(
                0,
                Pointer {
                    separator: old_parent_sep,
                    page_id: moved.page_id,
                },
            );
            parent.pointers_mut()[lower_idx].separator = promoted;
        }
    }

    // Folds lower into upper (the surviving page keeps upper's id) and
    // removes the parent's pointer at lower's slot.
    fn merge(
        &self,
        lower: DataPage<K, V>,
        mut upper: DataPage<K, V>,
        parent: &mut DataPage<K, V>,
        lower_idx: usize,
    ) -> Result<()> {
        if lower.is_leaf() {
            let mut entries = lower.entries().to_vec();
            entries.extend(upper.entries().iter().cloned());
            upper.set_entries(entries);
        } else {
            let parent_sep = parent.pointers()[lower_idx].separator.clone();
            let mut combined = lower.pointers().to_vec();
            let last_idx = combined.len() - 1;
            combined[last_idx].separator = parent_sep;
            combined.extend(upper.pointers().iter().cloned());
            upper.set_pointers(combined);
        }

        self.driver.free(lower.id)?;
        log::debug!("merged page {} into {}", lower.id, upper.id);
        let mut pointers = parent.pointers().to_vec();
        pointers.remove(lower_idx);
        parent.set_pointers(pointers);
        self.driver.put(upper.id, Page::Data(upper).encode())
    }

    pub fn generator(&self) -> Result<Vec<(u64, Vec<u8>)>> {
        self.driver.generator()
    }
}


// Property-style laws run against small random key/value sequences,
// in the style of the sibling example repo's btree_matches_btreemap_random_ops.
#[cfg(test)]
mod proptests {
    use super::tests::DirectDriver;
    use super::BPlusTree;
    use proptest::prelude::*;
    use std::collections::BTreeMap;

    fn tree_with_page_size(max_page_size: usize) -> BPlusTree<DirectDriver, u32, i32> {
        BPlusTree::open(DirectDriver::new(max_page_size))
    }

    fn kv_pairs() -> impl Strategy<Value = Vec<(u32, i32)>> {
        prop::collection::vec((0u32..200, any::<i32>()), 0..60)
    }

    proptest! {
        #[test]
        fn upsert_overwrite_matches_last_write_wins(pairs in kv_pairs()) {
            let tree = tree_with_page_size(64);
            let mut reference = BTreeMap::new();
            for (k, v) in pairs {
                tree.add(k, Some(v)).unwrap();
                reference.insert(k, v);
            }
            for (k, v) in &reference {
                prop_assert_eq!(tree.find(k).unwrap(), Some(Some(*v)));
            }
        }

        #[test]
        fn insert_then_find_all_recovers_every_key(pairs in kv_pairs()) {
            let tree = tree_with_page_size(64);
            let mut reference = BTreeMap::new();
            for (k, v) in pairs {
                tree.add(k, Some(v)).unwrap();
                reference.insert(k, v);
            }
            for k in 0u32..200 {
                prop_assert_eq!(tree.find(&k).unwrap(), reference.get(&k).map(|v| Some(*v)));
            }
        }

        #[test]
        fn insert_then_delete_all_leaves_an_empty_root(pairs in kv_pairs()) {
            let tree = tree_with_page_size(64);
            let mut keys = Vec::new();
            for (k, v) in pairs {
                tree.add(k, Some(v)).unwrap();
                keys.push(k);
            }
            keys.sort_unstable();
            keys.dedup();
            for k in &keys {
                prop_assert!(tree.delete(k).unwrap().is_some());
            }
            for k in &keys {
                prop_assert_eq!(tree.find(k).unwrap(), None);
            }
            let root = tree.root_page().unwrap();
            prop_assert!(root.is_leaf());
            prop_assert!(root.entries().is_empty());
        }
    }
}
