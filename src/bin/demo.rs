// Build a tree over an in-memory block store, insert, look up, walk
// forward with find_next, delete. Run with RUST_LOG=debug to see the
// split/merge/collapse/allocate trace.

use pagetree::{BPlusTree, InMemoryBlockStore, StorageDriver};

fn main() {
    env_logger::init();

    let store = InMemoryBlockStore::new(256);
    let driver = StorageDriver::open(store);
    let tree: BPlusTree<_, String, String> = BPlusTree::open(driver);

    for i in 0..40 {
        let key = format!("key-{i:03}");
        let value = format!("value-{i}");
        tree.add(key, Some(value)).expect("add should succeed");
    }

    println!("key-007 -> {:?}", tree.find(&"key-007".to_string()).unwrap());
    println!("key-999 -> {:?}", tree.find(&"key-999".to_string()).unwrap());

    let mut cursor = "key-000".to_string();
    let mut forward = Vec::new();
    while let Some(next) = tree.find_next(&cursor).unwrap() {
        forward.push(next.clone());
        // Advance past `next` by appending a character no real key has.
        cursor = format!("{next}\u{0}");
        if forward.len() >= 5 {
            break;
        }
    }
    println!("first five keys in order: {forward:?}");

    let removed = tree.delete(&"key-007".to_string()).unwrap();
    println!("deleted key-007, had value {removed:?}");
    println!("key-007 -> {:?}", tree.find(&"key-007".to_string()).unwrap());
}
