//! SID-indexed directory arena and per-storage child trees
//!
//! Entries never move. Deleting one turns its slot back into an invalid
//! placeholder that a later insert may reuse.

use super::entry::{compare_names, Color, DirectoryEntry, StorageType};
use super::rbtree::{NodeStore, Occupied, RbTree};
use crate::allocator::corruption;
use crate::error::{CompoundError, Result};
use crate::sector::NOSTREAM;
use ahash::AHashSet;
use std::cmp::Ordering;

fn link(sid: u32) -> Option<u32> {
    (sid != NOSTREAM).then_some(sid)
}

fn unlink(sid: Option<u32>) -> u32 {
    sid.unwrap_or(NOSTREAM)
}

#[derive(Debug, Clone, Default)]
pub struct DirectoryArena {
    entries: Vec<DirectoryEntry>,
}

impl DirectoryArena {
    /// Arena holding only a fresh root entry
    pub fn new() -> Self {
        DirectoryArena {
            entries: vec![DirectoryEntry::root()],
        }
    }

    pub fn from_entries(entries: Vec<DirectoryEntry>) -> Self {
        DirectoryArena { entries }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[DirectoryEntry] {
        &self.entries
    }

    pub fn get(&self, sid: u32) -> Result<&DirectoryEntry> {
        self.entries.get(sid as usize).ok_or_else(|| {
            CompoundError::InvalidArgument(format!(
                "SID {} out of range ({} entries)",
                sid,
                self.entries.len()
            ))
        })
    }

    pub fn get_mut(&mut self, sid: u32) -> Result<&mut DirectoryEntry> {
        let len = self.entries.len();
        self.entries.get_mut(sid as usize).ok_or_else(|| {
            CompoundError::InvalidArgument(format!("SID {} out of range ({} entries)", sid, len))
        })
    }

    pub fn root(&self) -> Result<&DirectoryEntry> {
        self.entries
            .first()
            .ok_or_else(|| CompoundError::Corrupted("directory has no root entry".to_string()))
    }

    pub fn root_mut(&mut self) -> Result<&mut DirectoryEntry> {
        self.entries
            .first_mut()
            .ok_or_else(|| CompoundError::Corrupted("directory has no root entry".to_string()))
    }

    /// Append a new entry and return its SID
    pub fn new_entry(&mut self, name: Vec<u16>, storage_type: StorageType) -> u32 {
        let sid = self.entries.len() as u32;
        self.entries.push(DirectoryEntry::new(sid, name, storage_type));
        sid
    }

    /// Like `new_entry`, but reuse the first invalid slot if there is one
    pub fn try_new_entry(&mut self, name: Vec<u16>, storage_type: StorageType) -> u32 {
        let free = self
            .entries
            .iter()
            .skip(1)
            .position(DirectoryEntry::is_invalid)
            .map(|i| i + 1);

        match free {
            Some(index) => {
                let sid = index as u32;
                let slot = &mut self.entries[index];
                let generation = slot.generation.wrapping_add(1);
                *slot = DirectoryEntry::new(sid, name, storage_type);
                slot.generation = generation;
                sid
            }
            None => self.new_entry(name, storage_type),
        }
    }

    /// Turn a slot back into an invalid placeholder
    pub fn reset(&mut self, sid: u32) {
        if let Some(entry) = self.entries.get_mut(sid as usize) {
            let generation = entry.generation.wrapping_add(1);
            *entry = DirectoryEntry::invalid(sid);
            entry.generation = generation;
        }
    }

    /// Undo a `try_new_entry`
    pub fn rollback(&mut self, sid: u32) {
        if sid as usize + 1 == self.entries.len() && sid != 0 {
            self.entries.pop();
        } else {
            self.reset(sid);
        }
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    fn tree_of(&self, storage: u32) -> Result<RbTree> {
        Ok(RbTree::new(link(self.get(storage)?.child)))
    }

    fn store_tree(&mut self, storage: u32, tree: RbTree) -> Result<()> {
        self.get_mut(storage)?.child = unlink(tree.root);
        Ok(())
    }

    /// Link `sid` into `storage`'s child tree
    pub fn insert_child(&mut self, storage: u32, sid: u32) -> Result<()> {
        let mut tree = self.tree_of(storage)?;
        tree.insert(self, sid).map_err(|Occupied(existing)| {
            CompoundError::DuplicatedItem(format!(
                "'{}' already exists",
                self.entries[existing as usize].name_string()
            ))
        })?;
        self.store_tree(storage, tree)
    }

    /// Find a direct child of `storage` by name
    pub fn find_child(&self, storage: u32, name: &[u16]) -> Result<Option<u32>> {
        let tree = self.tree_of(storage)?;
        Ok(tree.lookup(self, |node| compare_names(name, &self.entries[node as usize].name)))
    }

    /// Unlink `sid` from `storage`'s child tree and rethread `storage.child`
    pub fn remove_child(&mut self, storage: u32, sid: u32) -> Result<()> {
        let mut tree = self.tree_of(storage)?;
        tree.delete(self, sid);
        self.store_tree(storage, tree)
    }

    /// Direct children of `storage`, in tree order
    pub fn children(&self, storage: u32) -> Result<Vec<u32>> {
        let tree = self.tree_of(storage)?;
        let mut children = Vec::new();
        tree.visit_in_order(self, |sid| children.push(sid));
        Ok(children)
    }

    /// Rebuild `storage`'s child tree from scratch (after a rename)
    pub fn rebuild_tree(&mut self, storage: u32) -> Result<()> {
        let children = self.children(storage)?;
        let mut tree = RbTree::default();
        for sid in children {
            tree.insert(self, sid).map_err(|Occupied(existing)| {
                CompoundError::DuplicatedItem(format!(
                    "'{}' already exists",
                    self.entries[existing as usize].name_string()
                ))
            })?;
        }
        self.store_tree(storage, tree)
    }

    /// Rebuild every storage's child tree from the on-disk sibling and
    /// child links.
    ///
    /// Links are untrusted: every SID must be in range, valid, claimed by
    /// at most one storage, and each storage is expanded once.
    pub fn load_trees(&mut self, lenient: bool) -> Result<()> {
        let root = self.root()?;
        if root.storage_type != StorageType::Root {
            return Err(CompoundError::Corrupted(format!(
                "entry 0 is a {:?}, not the root",
                root.storage_type
            )));
        }

        for sid in 1..self.entries.len() {
            if self.entries[sid].storage_type == StorageType::Root {
                corruption(lenient, format!("second root entry at SID {}", sid))?;
                self.entries[sid].storage_type = StorageType::Invalid;
            }
        }

        let mut claimed = AHashSet::new();
        claimed.insert(0u32);
        let mut expanded = AHashSet::new();
        let mut pending = vec![0u32];

        while let Some(storage) = pending.pop() {
            if !expanded.insert(storage) {
                continue;
            }

            let members = self.collect_level(storage, &mut claimed, lenient)?;
            for &sid in &members {
                let entry = &mut self.entries[sid as usize];
                entry.left = NOSTREAM;
                entry.right = NOSTREAM;
                entry.parent = None;
                if !entry.storage_type.is_container() {
                    entry.child = NOSTREAM;
                }
            }

            let mut tree = RbTree::default();
            for &sid in &members {
                if let Err(Occupied(existing)) = tree.insert(self, sid) {
                    corruption(
                        lenient,
                        format!(
                            "duplicate name '{}' under SID {} (SIDs {} and {})",
                            self.entries[sid as usize].name_string(),
                            storage,
                            existing,
                            sid
                        ),
                    )?;
                    continue;
                }
                if self.entries[sid as usize].storage_type.is_container() {
                    pending.push(sid);
                }
            }
            self.store_tree(storage, tree)?;
        }

        Ok(())
    }

    /// SIDs reachable from `storage.child` through sibling links
    fn collect_level(
        &self,
        storage: u32,
        claimed: &mut AHashSet<u32>,
        lenient: bool,
    ) -> Result<Vec<u32>> {
        let mut members = Vec::new();
        let mut visited = AHashSet::new();
        let mut pending = vec![self.entries[storage as usize].child];

        while let Some(sid) = pending.pop() {
            if sid == NOSTREAM {
                continue;
            }
            if sid as usize >= self.entries.len() {
                corruption(
                    lenient,
                    format!(
                        "SID {} under storage {} out of range ({} entries)",
                        sid,
                        storage,
                        self.entries.len()
                    ),
                )?;
                continue;
            }
            if !visited.insert(sid) {
                corruption(lenient, format!("cycle at SID {} under storage {}", sid, storage))?;
                continue;
            }

            let entry = &self.entries[sid as usize];
            if entry.is_invalid() {
                corruption(
                    lenient,
                    format!("SID {} under storage {} is an unused entry", sid, storage),
                )?;
                continue;
            }
            if !claimed.insert(sid) {
                corruption(
                    lenient,
                    format!("SID {} is linked from more than one place", sid),
                )?;
                continue;
            }

            members.push(sid);
            pending.push(entry.left);
            pending.push(entry.right);
        }

        Ok(members)
    }
}

impl NodeStore for DirectoryArena {
    fn left(&self, node: u32) -> Option<u32> {
        link(self.entries[node as usize].left)
    }

    fn right(&self, node: u32) -> Option<u32> {
        link(self.entries[node as usize].right)
    }

    fn parent(&self, node: u32) -> Option<u32> {
        self.entries[node as usize].parent
    }

    fn color(&self, node: u32) -> Color {
        self.entries[node as usize].color
    }

    fn set_left(&mut self, node: u32, left: Option<u32>) {
        self.entries[node as usize].left = unlink(left);
    }

    fn set_right(&mut self, node: u32, right: Option<u32>) {
        self.entries[node as usize].right = unlink(right);
    }

    fn set_parent(&mut self, node: u32, parent: Option<u32>) {
        self.entries[node as usize].parent = parent;
    }

    fn set_color(&mut self, node: u32, color: Color) {
        self.entries[node as usize].color = color;
    }

    fn compare(&self, a: u32, b: u32) -> Ordering {
        self.entries[a as usize].compare(&self.entries[b as usize])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn units(name: &str) -> Vec<u16> {
        name.encode_utf16().collect()
    }

    fn add(arena: &mut DirectoryArena, storage: u32, name: &str, ty: StorageType) -> Result<u32> {
        let sid = arena.try_new_entry(units(name), ty);
        if let Err(e) = arena.insert_child(storage, sid) {
            arena.rollback(sid);
            return Err(e);
        }
        Ok(sid)
    }

    fn names(arena: &DirectoryArena, storage: u32) -> Vec<String> {
        arena
            .children(storage)
            .unwrap()
            .into_iter()
            .map(|sid| arena.get(sid).unwrap().name_string())
            .collect()
    }

    #[test]
    fn test_children_sorted_by_comparator() {
        let mut arena = DirectoryArena::new();
        for name in ["AA", "b", "A", "ccc"] {
            add(&mut arena, 0, name, StorageType::Stream).unwrap();
        }
        assert_eq!(names(&arena, 0), vec!["A", "b", "AA", "ccc"]);
    }

    #[test]
    fn test_duplicate_rolls_back() {
        let mut arena = DirectoryArena::new();
        add(&mut arena, 0, "Stream", StorageType::Stream).unwrap();
        let before = arena.len();

        let err = add(&mut arena, 0, "STREAM", StorageType::Stream).unwrap_err();
        assert!(matches!(err, CompoundError::DuplicatedItem(_)));
        assert_eq!(arena.len(), before);
        assert_eq!(arena.children(0).unwrap().len(), 1);
    }

    #[test]
    fn test_find_and_remove() {
        let mut arena = DirectoryArena::new();
        let mut sids = Vec::new();
        for i in 0..20 {
            sids.push(add(&mut arena, 0, &format!("s{i}"), StorageType::Stream).unwrap());
        }

        assert_eq!(arena.find_child(0, &units("S7")).unwrap(), Some(sids[7]));
        assert_eq!(arena.find_child(0, &units("s99")).unwrap(), None);

        arena.remove_child(0, sids[7]).unwrap();
        arena.reset(sids[7]);
        assert_eq!(arena.find_child(0, &units("s7")).unwrap(), None);
        assert_eq!(arena.children(0).unwrap().len(), 19);

        // Freed slot is reused
        let reused = add(&mut arena, 0, "new", StorageType::Stream).unwrap();
        assert_eq!(reused, sids[7]);
    }

    #[test]
    fn test_remove_last_child_clears_link() {
        let mut arena = DirectoryArena::new();
        let sid = add(&mut arena, 0, "only", StorageType::Storage).unwrap();
        arena.remove_child(0, sid).unwrap();
        assert_eq!(arena.root().unwrap().child, NOSTREAM);
    }

    #[test]
    fn test_load_trees_rebuilds_levels() {
        let mut arena = DirectoryArena::new();
        let storage = add(&mut arena, 0, "dir", StorageType::Storage).unwrap();
        add(&mut arena, 0, "a", StorageType::Stream).unwrap();
        add(&mut arena, storage, "x", StorageType::Stream).unwrap();
        add(&mut arena, storage, "y", StorageType::Stream).unwrap();

        // Scramble colors and parents as a disk round trip would
        let mut loaded = DirectoryArena::from_entries(arena.entries().to_vec());
        for entry in loaded.entries.iter_mut() {
            entry.parent = None;
            entry.color = Color::Red;
        }
        loaded.load_trees(false).unwrap();

        assert_eq!(names(&loaded, 0), vec!["a", "dir"]);
        assert_eq!(names(&loaded, storage), vec!["x", "y"]);
    }

    #[test]
    fn test_load_trees_detects_cycle() {
        let mut arena = DirectoryArena::new();
        let a = add(&mut arena, 0, "a", StorageType::Stream).unwrap();
        let b = add(&mut arena, 0, "bb", StorageType::Stream).unwrap();
        arena.entries[0].child = a;
        arena.entries[a as usize].right = b;
        arena.entries[b as usize].left = a;

        let mut strict = arena.clone();
        assert!(strict.load_trees(false).unwrap_err().is_corruption());

        let mut lenient = arena.clone();
        lenient.load_trees(true).unwrap();
        assert_eq!(names(&lenient, 0), vec!["a", "bb"]);
    }

    #[test]
    fn test_load_trees_rejects_shared_subtree() {
        let mut arena = DirectoryArena::new();
        let d1 = add(&mut arena, 0, "d1", StorageType::Storage).unwrap();
        let d2 = add(&mut arena, 0, "d2", StorageType::Storage).unwrap();
        let s = add(&mut arena, d1, "s", StorageType::Stream).unwrap();
        arena.entries[d2 as usize].child = s;

        assert!(arena.clone().load_trees(false).unwrap_err().is_corruption());
    }

    #[test]
    fn test_load_trees_requires_root() {
        let mut arena = DirectoryArena::from_entries(vec![DirectoryEntry::new(
            0,
            units("x"),
            StorageType::Stream,
        )]);
        assert!(arena.load_trees(true).unwrap_err().is_corruption());
    }

    #[test]
    fn test_rebuild_after_rename() {
        let mut arena = DirectoryArena::new();
        let z = add(&mut arena, 0, "zz", StorageType::Stream).unwrap();
        add(&mut arena, 0, "m", StorageType::Stream).unwrap();

        arena.get_mut(z).unwrap().name = units("a");
        arena.rebuild_tree(0).unwrap();
        assert_eq!(names(&arena, 0), vec!["a", "m"]);
        assert_eq!(arena.find_child(0, &units("A")).unwrap(), Some(z));
    }
}
