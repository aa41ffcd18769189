pub mod block_store;
pub mod codec;
pub mod driver;
pub mod error;
pub mod page;
pub mod tree;

pub use block_store::{BlockStore, BlockStoreOptions, InMemoryBlockStore};
pub use codec::Codec;
pub use driver::StorageDriver;
pub use error::{Error, Result};
pub use tree::{BPlusTree, PageDriver};
