use std::collections::HashMap;

use crate::error::Error;

// The only two knobs a block store exposes. max_page_size bounds every
// serialized page; supports_internal_delete tells the driver whether a
// freed internal id can be physically reclaimed by the backend itself,
// as opposed to just being recorded as free and reissued.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockStoreOptions {
    pub max_page_size: usize,
    pub supports_internal_delete: bool,
}

// No ordering, no rebalancing, no idea of pages: an opaque integer-keyed
// byte map plus enumeration for diagnostics.
pub trait BlockStore {
    fn get(&self, id: u64) -> Result<Option<Vec<u8>>, Error>;
    fn put(&mut self, id: u64, bytes: Vec<u8>) -> Result<(), Error>;
    fn generator(&self) -> Result<Vec<(u64, Vec<u8>)>, Error>;
    fn options(&self) -> BlockStoreOptions;
}

#[derive(Debug, Default)]
pub struct InMemoryBlockStore {
    pages: HashMap<u64, Vec<u8>>,
    max_page_size: usize,
}

impl InMemoryBlockStore {
    pub fn new(max_page_size: usize) -> Self {
        Self {
            pages: HashMap::new(),
            max_page_size,
        }
    }
}

impl BlockStore for InMemoryBlockStore {
    fn get(&self, id: u64) -> Result<Option<Vec<u8>>, Error> {
        Ok(self.pages.get(&id).cloned())
    }

    fn put(&mut self, id: u64, bytes: Vec<u8>) -> Result<(), Error> {
        self.pages.insert(id, bytes);
        Ok(())
    }

    fn generator(&self) -> Result<Vec<(u64, Vec<u8>)>, Error> {
        Ok(self
            .pages
            .iter()
            .map(|(id, bytes)| (*id, bytes.clone()))
            .collect())
    }

    fn options(&self) -> BlockStoreOptions {
        BlockStoreOptions {
            max_page_size: self.max_page_size,
            // An in-memory map can always drop a key outright; nothing
            // ever needs to be tombstoned purely for the backend's sake.
            supports_internal_delete: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn get_on_empty_store_is_none() {
        let store = InMemoryBlockStore::new(256);
        assert_eq!(store.get(0).unwrap(), None);
    }

    #[test]
    fn put_then_get_roundtrips() {
        let mut store = InMemoryBlockStore::new(256);
        store.put(3, vec![1, 2, 3]).unwrap();
        assert_eq!(store.get(3).unwrap(), Some(vec![1, 2, 3]));
    }

    #[test]
    fn put_overwrites() {
        let mut store = InMemoryBlockStore::new(256);
        store.put(3, vec![1]).unwrap();
        store.put(3, vec![9, 9]).unwrap();
        assert_eq!(store.get(3).unwrap(), Some(vec![9, 9]));
    }

    #[test]
    fn generator_yields_all_pages() {
        let mut store = InMemoryBlockStore::new(256);
        store.put(0, vec![0]).unwrap();
        store.put(1, vec![1]).unwrap();
        let mut pairs = store.generator().unwrap();
        pairs.sort_by_key(|(id, _)| *id);
        assert_eq!(pairs, vec![(0, vec![0]), (1, vec![1])]);
    }

    #[test]
    fn options_reports_configured_page_size() {
        let store = InMemoryBlockStore::new(512);
        let opts = store.options();
        assert_eq!(opts.max_page_size, 512);
        assert!(opts.supports_internal_delete);
    }
}
