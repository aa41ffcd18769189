// StorageDriver turns a raw, unordered BlockStore into the id-stable
// PageDriver a BPlusTree expects: external page ids get remapped onto
// internal block-store ids through a private id-map tree, and freed
// internal ids get recycled through a private free-map tree.
//
// Both private trees are driven by BypassAdapter, which talks straight to
// the raw block store and never consults the free-map itself. That keeps
// the free-map's own growth from recursing into itself.
//
// Three ids are reserved and never pass through the id-map or the
// allocator: the public tree's MetaPage lives at id 0, the id-map's at
// id 1, the free-map's at id 2. Dynamic ids start at 3.

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::rc::Rc;

use crate::block_store::BlockStore;
use crate::error::{Error, Result};
use crate::page::{FreePage, Page};
use crate::tree::{BPlusTree, PageDriver};

const DATA_META_ID: u64 = 0;
const ID_MAP_META_ID: u64 = 1;
const FREE_MAP_META_ID: u64 = 2;
const FIRST_DYNAMIC_ID: u64 = 3;

// The free-map's and pending-queue's bookkeeping keys are u64s with no
// payload, so the page codec is instantiated at (u64, ()) purely to reach
// Page::encode.
fn encode_free_page(fp: FreePage) -> Vec<u8> {
    Page::<u64, ()>::Free(fp).encode()
}

// Raw get/put/generator against the shared block store at a fixed reserved
// metadata id, plus allocation that only ever draws from the pending queue
// or bumps the shared counter. Never consults the free-map.
pub struct BypassAdapter<B> {
    raw: Rc<RefCell<B>>,
    counter: Rc<Cell<u64>>,
    pending: Rc<RefCell<VecDeque<u64>>>,
    meta_id: u64,
}

impl<B: BlockStore> PageDriver for BypassAdapter<B> {
    fn max_page_size(&self) -> usize {
        self.raw.borrow().options().max_page_size
    }

    fn get_metadata(&self) -> Result<Option<Vec<u8>>> {
        self.raw.borrow().get(self.meta_id)
    }

    fn put_metadata(&self, bytes: Vec<u8>) -> Result<()> {
        self.raw.borrow_mut().put(self.meta_id, bytes)
    }

    fn get(&self, id: u64) -> Result<Option<Vec<u8>>> {
        self.raw.borrow().get(id)
    }

    fn put(&self, id: u64, bytes: Vec<u8>) -> Result<()> {
        self.raw.borrow_mut().put(id, bytes)
    }

    fn free(&self, id: u64) -> Result<()> {
        self.raw
            .borrow_mut()
            .put(id, encode_free_page(FreePage { id, detached: false }))?;
        self.pending.borrow_mut().push_back(id);
        Ok(())
    }

    fn allocate(&self) -> Result<u64> {
        if let Some(id) = self.pending.borrow_mut().pop_front() {
            return Ok(id);
        }
        let id = self.counter.get();
        self.counter.set(id + 1);
        Ok(id)
    }

    fn generator(&self) -> Result<Vec<(u64, Vec<u8>)>> {
        self.raw.borrow().generator()
    }
}

// External page ids the public tree hands out are stable for the tree's
// lifetime, even though the physical ids backing them may be recycled
// underneath.
pub struct StorageDriver<B> {
    raw: Rc<RefCell<B>>,
    counter: Rc<Cell<u64>>,
    pending: Rc<RefCell<VecDeque<u64>>>,
    id_map: BPlusTree<BypassAdapter<B>, u64, u64>,
    // Keyed by internal id, valued by the external id that last owned it.
    // Recycling only ever looks at the key.
    free_map: BPlusTree<BypassAdapter<B>, u64, u64>,
}

impl<B: BlockStore> StorageDriver<B> {
    pub fn open(raw: B) -> Self {
        let raw = Rc::new(RefCell::new(raw));
        let counter = Rc::new(Cell::new(FIRST_DYNAMIC_ID));
        let pending = Rc::new(RefCell::new(VecDeque::new()));

        let id_map_driver = BypassAdapter {
            raw: raw.clone(),
            counter: counter.clone(),
            pending: pending.clone(),
            meta_id: ID_MAP_META_ID,
        };
        let free_map_driver = BypassAdapter {
            raw: raw.clone(),
            counter: counter.clone(),
            pending: pending.clone(),
            meta_id: FREE_MAP_META_ID,
        };

        Self {
            raw,
            counter,
            pending,
            id_map: BPlusTree::open(id_map_driver),
            free_map: BPlusTree::open(free_map_driver),
        }
    }

    fn internal_id_for(&self, ext_id: u64) -> Result<u64> {
        match self.id_map.find(&ext_id)? {
            Some(Some(internal_id)) => Ok(internal_id),
            _ => Err(Error::Corrupt(format!("no id-map entry for external id {ext_id}"))),
        }
    }

    // Mints a physical id: first from ids freed mid free-map-operation, then
    // by recycling the smallest free-map entry, falling back to a fresh
    // counter value. Busy from the free-map (this call happening while the
    // free-map's own tree is already mid-mutation elsewhere on the stack) is
    // treated the same as nothing to recycle right now.
    fn next_id(&self) -> Result<u64> {
        if let Some(id) = self.pending.borrow_mut().pop_front() {
            return Ok(id);
        }

        match self.free_map.find_next(&0) {
            Ok(Some(id)) => match self.free_map.delete(&id) {
                Ok(_) => {
                    self.raw
                        .borrow_mut()
                        .put(id, encode_free_page(FreePage { id, detached: true }))?;
                    return Ok(id);
                }
                Err(Error::Busy) => {}
                Err(e) => return Err(e),
            },
            Ok(None) => {}
            Err(Error::Busy) => {}
            Err(e) => return Err(e),
        }

        let id = self.counter.get();
        self.counter.set(id + 1);
        Ok(id)
    }

    // Marks a physical id free on disk and offers it to the free-map for
    // recycling. If the free-map is already busy (this call is itself
    // happening from within a free-map mutation further up the stack), the
    // id is queued instead and picked up by a later next_id call.
    fn free_internal(&self, id: u64, recorded_ext_id: u64) -> Result<()> {
        self.raw
            .borrow_mut()
            .put(id, encode_free_page(FreePage { id, detached: false }))?;
        match self.free_map.add(id, Some(recorded_ext_id)) {
            Ok(()) => Ok(()),
            Err(Error::Busy) => {
                self.pending.borrow_mut().push_back(id);
                Ok(())
            }
            Err(e) => Err(e),
        }
    }
}

impl<B: BlockStore> PageDriver for StorageDriver<B> {
    fn max_page_size(&self) -> usize {
        self.raw.borrow().options().max_page_size
    }

    fn get_metadata(&self) -> Result<Option<Vec<u8>>> {
        self.raw.borrow().get(DATA_META_ID)
    }

    fn put_metadata(&self, bytes: Vec<u8>) -> Result<()> {
        self.raw.borrow_mut().put(DATA_META_ID, bytes)
    }

    fn get(&self, ext_id: u64) -> Result<Option<Vec<u8>>> {
        let internal_id = self.internal_id_for(ext_id)?;
        self.raw.borrow().get(internal_id)
    }

    fn put(&self, ext_id: u64, bytes: Vec<u8>) -> Result<()> {
        let internal_id = self.internal_id_for(ext_id)?;
        self.raw.borrow_mut().put(internal_id, bytes)
    }

    fn free(&self, ext_id: u64) -> Result<()> {
        let internal_id = self.internal_id_for(ext_id)?;
        self.id_map.delete(&ext_id)?;
        self.free_internal(internal_id, ext_id)
    }

    // Mints a fresh internal id and immediately records the identity
    // mapping id -> id in the id-map before handing it back, so a
    // subsequent put(id, ..) always finds a mapping already in place.
    fn allocate(&self) -> Result<u64> {
        let id = self.next_id()?;
        self.id_map.add(id, Some(id))?;
        log::trace!("allocated external id {id}");
        Ok(id)
    }

    fn generator(&self) -> Result<Vec<(u64, Vec<u8>)>> {
        self.raw.borrow().generator()
    }
}
