//! Directory entries and the tree of trees
//!
//! The directory is a flat array of 128-byte records addressed by SID.
//! Each storage's direct children form a red-black tree whose nodes are
//! the records themselves, rooted at the storage's `child` link.

pub mod arena;
pub mod entry;
pub mod rbtree;

pub use arena::DirectoryArena;
pub use entry::{
    compare_names, Clsid, Color, DirectoryEntry, EntryInfo, StorageType, DIRECTORY_ENTRY_SIZE,
};
pub use rbtree::{NodeStore, Occupied, RbTree};
