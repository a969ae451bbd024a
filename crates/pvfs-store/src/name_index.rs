//! Reverse index from name id to the records carrying that name.
//!
//! Most names belong to exactly one file, so the index keeps a plain
//! `name -> file` map for those and only promotes a name into the multi map
//! once a second file shows up. Multi entries hold an inline pair, then a
//! zero-padded array whose first slot is the live count.

use std::collections::HashMap;

use parking_lot::RwLock;
use pvfs_config::log_store_warn;
use rayon::prelude::*;

use crate::error::Result;
use crate::layout::NULL_ID;
use crate::records::RecordTable;

/// Initial array capacity after growing out of a pair, count slot included
const INITIAL_ARRAY_LEN: usize = 4;

#[derive(Debug, Clone, PartialEq, Eq)]
enum MultiEntry {
    Pair(u32, u32),
    /// `[count, id_1, .., id_count, 0, ..]`
    Array(Box<[u32]>),
}

impl MultiEntry {
    fn ids(&self) -> Vec<u32> {
        match self {
            MultiEntry::Pair(a, b) => vec![*a, *b],
            MultiEntry::Array(slots) => slots[1..=slots[0] as usize].to_vec(),
        }
    }

    fn contains(&self, id: u32) -> bool {
        match self {
            MultiEntry::Pair(a, b) => *a == id || *b == id,
            MultiEntry::Array(slots) => slots[1..=slots[0] as usize].contains(&id),
        }
    }

    fn len(&self) -> usize {
        match self {
            MultiEntry::Pair(..) => 2,
            MultiEntry::Array(slots) => slots[0] as usize,
        }
    }
}

#[derive(Default)]
struct IndexMaps {
    single: HashMap<u32, u32>,
    multi: HashMap<u32, MultiEntry>,
}

impl IndexMaps {
    fn add(&mut self, name_id: u32, file_id: u32) {
        if let Some(entry) = self.multi.get_mut(&name_id) {
            if entry.contains(file_id) {
                return;
            }
            let grown = match entry {
                MultiEntry::Pair(a, b) => {
                    let mut slots = vec![0u32; INITIAL_ARRAY_LEN];
                    slots[0] = 3;
                    slots[1] = *a;
                    slots[2] = *b;
                    slots[3] = file_id;
                    Some(MultiEntry::Array(slots.into_boxed_slice()))
                }
                MultiEntry::Array(slots) => {
                    let count = slots[0] as usize;
                    if count + 1 < slots.len() {
                        slots[count + 1] = file_id;
                        slots[0] += 1;
                        None
                    } else {
                        let mut bigger = vec![0u32; slots.len() * 2];
                        bigger[..slots.len()].copy_from_slice(slots);
                        bigger[count + 1] = file_id;
                        bigger[0] += 1;
                        Some(MultiEntry::Array(bigger.into_boxed_slice()))
                    }
                }
            };
            if let Some(grown) = grown {
                *entry = grown;
            }
            return;
        }

        match self.single.get(&name_id) {
            None => {
                self.single.insert(name_id, file_id);
            }
            Some(&existing) if existing == file_id => {}
            Some(&existing) => {
                self.single.remove(&name_id);
                self.multi.insert(name_id, MultiEntry::Pair(existing, file_id));
            }
        }
    }

    fn remove(&mut self, name_id: u32, file_id: u32) {
        if self.single.get(&name_id) == Some(&file_id) {
            self.single.remove(&name_id);
            return;
        }
        let Some(entry) = self.multi.get_mut(&name_id) else {
            return;
        };
        match entry {
            MultiEntry::Pair(a, b) => {
                let survivor = if *a == file_id {
                    *b
                } else if *b == file_id {
                    *a
                } else {
                    return;
                };
                self.multi.remove(&name_id);
                self.single.insert(name_id, survivor);
            }
            MultiEntry::Array(slots) => {
                let count = slots[0] as usize;
                let Some(pos) = slots[1..=count].iter().position(|&id| id == file_id) else {
                    return;
                };
                // Keep ids packed: move the last one into the hole.
                slots[pos + 1] = slots[count];
                slots[count] = 0;
                slots[0] -= 1;
                if slots[0] == 1 {
                    let survivor = slots[1];
                    self.multi.remove(&name_id);
                    self.single.insert(name_id, survivor);
                }
            }
        }
    }
}

/// Name-id → file-ids reverse index
#[derive(Default)]
pub struct NameIndex {
    maps: RwLock<IndexMaps>,
}

impl NameIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild from every live record of `records`.
    pub fn rebuild(records: &RecordTable) -> Result<Self> {
        let max = records.max_allocated_id();
        let pairs: Vec<(u32, u32)> = (1..=max)
            .into_par_iter()
            .filter_map(|id| {
                let record = records.record(id).ok()?;
                (!record.is_deleted() && record.name_id != NULL_ID).then_some((record.name_id, id))
            })
            .collect();

        let index = Self::new();
        {
            let mut maps = index.maps.write();
            for (name_id, file_id) in pairs {
                maps.add(name_id, file_id);
            }
        }
        Ok(index)
    }

    /// Move `file_id` from `old_name_id` to `new_name_id`; either may be `0`.
    pub fn update(&self, file_id: u32, old_name_id: u32, new_name_id: u32) {
        if old_name_id == new_name_id {
            return;
        }
        let mut maps = self.maps.write();
        if old_name_id != NULL_ID {
            maps.remove(old_name_id, file_id);
        }
        if new_name_id != NULL_ID {
            maps.add(new_name_id, file_id);
        }
    }

    /// Ids of the files named `name_id`.
    pub fn files_with_name(&self, name_id: u32) -> Vec<u32> {
        let maps = self.maps.read();
        if let Some(id) = maps.single.get(&name_id) {
            return vec![*id];
        }
        maps.multi.get(&name_id).map(MultiEntry::ids).unwrap_or_default()
    }

    /// Call `visit` for each file carrying any of `name_ids`.
    ///
    /// Ids are copied out before visiting, so the visitor may mutate the
    /// index. Returns false only if the visitor stopped early.
    pub fn for_each_file_with_name(&self, name_ids: &[u32], visit: impl FnMut(u32) -> bool) -> bool {
        let mut ids = Vec::new();
        {
            let maps = self.maps.read();
            for name_id in name_ids {
                if let Some(id) = maps.single.get(name_id) {
                    ids.push(*id);
                } else if let Some(entry) = maps.multi.get(name_id) {
                    ids.extend(entry.ids());
                }
            }
        }
        ids.into_iter().all(visit)
    }

    pub fn clear(&self) {
        let mut maps = self.maps.write();
        maps.single.clear();
        maps.multi.clear();
    }

    /// Number of (name, file) associations
    pub fn len(&self) -> usize {
        let maps = self.maps.read();
        maps.single.len() + maps.multi.values().map(MultiEntry::len).sum::<usize>()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Structural problems: a name in both maps, or a multi entry with fewer than two files.
    pub fn check_consistency(&self) -> Vec<String> {
        let maps = self.maps.read();
        let mut problems = Vec::new();
        for (name_id, entry) in &maps.multi {
            if maps.single.contains_key(name_id) {
                problems.push(format!("name {} is in both single and multi maps", name_id));
            }
            if entry.len() < 2 {
                problems.push(format!("name {} has a multi entry with {} files", name_id, entry.len()));
            }
            let ids = entry.ids();
            if ids.contains(&NULL_ID) {
                problems.push(format!("name {} lists file id 0", name_id));
            }
        }
        for problem in &problems {
            log_store_warn!("Name index inconsistency", problem = problem.as_str());
        }
        problems
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::RecordField;
    use tempfile::tempdir;

    fn sorted(mut ids: Vec<u32>) -> Vec<u32> {
        ids.sort();
        ids
    }

    #[test]
    fn test_single_then_pair_then_array() {
        let index = NameIndex::new();
        index.update(10, 0, 5);
        assert_eq!(index.files_with_name(5), vec![10]);

        index.update(11, 0, 5);
        assert_eq!(sorted(index.files_with_name(5)), vec![10, 11]);

        for id in 12..20 {
            index.update(id, 0, 5);
        }
        assert_eq!(sorted(index.files_with_name(5)), (10..20).collect::<Vec<_>>());
        assert_eq!(index.len(), 10);
        assert!(index.check_consistency().is_empty());
    }

    #[test]
    fn test_demotes_back_to_single() {
        let index = NameIndex::new();
        for id in [1, 2, 3] {
            index.update(id, 0, 7);
        }
        index.update(2, 7, 0);
        assert_eq!(sorted(index.files_with_name(7)), vec![1, 3]);
        index.update(1, 7, 0);
        assert_eq!(index.files_with_name(7), vec![3]);
        assert!(index.check_consistency().is_empty());

        index.update(3, 7, 0);
        assert!(index.files_with_name(7).is_empty());
        assert!(index.is_empty());
    }

    #[test]
    fn test_pair_demotes_on_remove() {
        let index = NameIndex::new();
        index.update(1, 0, 9);
        index.update(2, 0, 9);
        index.update(1, 9, 0);
        assert_eq!(index.files_with_name(9), vec![2]);
        assert!(index.check_consistency().is_empty());
    }

    #[test]
    fn test_rename_moves_between_names() {
        let index = NameIndex::new();
        index.update(4, 0, 1);
        index.update(4, 1, 2);
        assert!(index.files_with_name(1).is_empty());
        assert_eq!(index.files_with_name(2), vec![4]);
        // Same name: no-op
        index.update(4, 2, 2);
        assert_eq!(index.len(), 1);
    }

    #[test]
    fn test_duplicate_add_is_ignored() {
        let index = NameIndex::new();
        index.update(1, 0, 3);
        index.update(2, 0, 3);
        index.update(2, 0, 3);
        assert_eq!(index.len(), 2);
    }

    #[test]
    fn test_visitor_may_mutate_and_stop() {
        let index = NameIndex::new();
        for id in 1..=5 {
            index.update(id, 0, 8);
        }
        let mut seen = 0;
        let completed = index.for_each_file_with_name(&[8], |id| {
            index.update(id, 8, 0);
            seen += 1;
            true
        });
        assert!(completed);
        assert_eq!(seen, 5);
        assert!(index.is_empty());

        index.update(1, 0, 8);
        index.update(2, 0, 8);
        assert!(!index.for_each_file_with_name(&[8], |_| false));
        // Missing names never stop the walk
        assert!(index.for_each_file_with_name(&[99], |_| false));
    }

    #[test]
    fn test_rebuild_skips_deleted_records() {
        let temp = tempdir().unwrap();
        let records = RecordTable::open(temp.path()).unwrap();
        for name in [3u64, 3, 4, 0] {
            let id = records.allocate().unwrap();
            records.write_field(id, RecordField::Name, name).unwrap();
        }
        records
            .update_flags(2, |f| f | crate::layout::RecordFlags::FREE_RECORD)
            .unwrap();

        let index = NameIndex::rebuild(&records).unwrap();
        assert_eq!(index.files_with_name(3), vec![1]);
        assert_eq!(index.files_with_name(4), vec![3]);
        assert_eq!(index.len(), 2);
    }
}
