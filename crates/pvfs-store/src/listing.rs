//! Immutable snapshots of a directory's children.

use std::collections::HashMap;
use std::sync::Arc;

use crate::layout::RecordFlags;

/// Stat-like attributes supplied with a child
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FileAttributes {
    pub flags: RecordFlags,
    pub length: u64,
    pub timestamp: u64,
}

impl FileAttributes {
    pub fn directory(timestamp: u64) -> Self {
        Self {
            flags: RecordFlags::DIRECTORY,
            length: 0,
            timestamp,
        }
    }

    pub fn file(length: u64, timestamp: u64) -> Self {
        Self {
            flags: RecordFlags::empty(),
            length,
            timestamp,
        }
    }

    pub fn is_directory(&self) -> bool {
        self.flags.contains(RecordFlags::DIRECTORY)
    }
}

/// One entry of a children list
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChildInfo {
    pub id: u32,
    pub name_id: u32,
    pub attributes: Option<FileAttributes>,
    pub symlink_target: Option<Arc<str>>,
}

impl ChildInfo {
    pub fn new(id: u32, name_id: u32) -> Self {
        Self {
            id,
            name_id,
            attributes: None,
            symlink_target: None,
        }
    }

    pub fn with_attributes(mut self, attributes: FileAttributes) -> Self {
        self.attributes = Some(attributes);
        self
    }

    pub fn with_symlink_target(mut self, target: impl Into<Arc<str>>) -> Self {
        self.symlink_target = Some(target.into());
        self
    }
}

/// Children of one directory, sorted by id, plus the parent's mod count at
/// the time they were read.
///
/// Mutators return new lists and leave the receiver untouched; the children
/// slice is shared between copies.
#[derive(Debug, Clone)]
pub struct ListResult {
    mod_count: u64,
    complete: bool,
    children: Arc<[ChildInfo]>,
}

impl ListResult {
    /// `children` need not be sorted; duplicate ids keep the last entry.
    pub fn new(mod_count: u64, mut children: Vec<ChildInfo>, complete: bool) -> Self {
        children.reverse();
        children.sort_by_key(|c| c.id);
        children.dedup_by_key(|c| c.id);
        Self {
            mod_count,
            complete,
            children: children.into(),
        }
    }

    pub fn empty(mod_count: u64) -> Self {
        Self::new(mod_count, Vec::new(), true)
    }

    fn with_children(&self, children: Vec<ChildInfo>) -> Self {
        Self {
            mod_count: self.mod_count,
            complete: self.complete,
            children: children.into(),
        }
    }

    pub fn mod_count(&self) -> u64 {
        self.mod_count
    }

    /// False when only part of the directory is known.
    pub fn is_complete(&self) -> bool {
        self.complete
    }

    pub fn children(&self) -> &[ChildInfo] {
        &self.children
    }

    pub fn ids(&self) -> Vec<u32> {
        self.children.iter().map(|c| c.id).collect()
    }

    pub fn len(&self) -> usize {
        self.children.len()
    }

    pub fn is_empty(&self) -> bool {
        self.children.is_empty()
    }

    pub fn find(&self, id: u32) -> Option<&ChildInfo> {
        self.children
            .binary_search_by_key(&id, |c| c.id)
            .ok()
            .map(|i| &self.children[i])
    }

    pub fn find_by_name(&self, name_id: u32) -> Option<&ChildInfo> {
        self.children.iter().find(|c| c.name_id == name_id)
    }

    pub fn mark_complete(&self, complete: bool) -> Self {
        Self {
            mod_count: self.mod_count,
            complete,
            children: self.children.clone(),
        }
    }

    pub fn with_mod_count(&self, mod_count: u64) -> Self {
        Self {
            mod_count,
            complete: self.complete,
            children: self.children.clone(),
        }
    }

    /// Insert `child`, replacing an entry with the same id.
    pub fn insert(&self, child: ChildInfo) -> Self {
        let mut children = self.children.to_vec();
        match children.binary_search_by_key(&child.id, |c| c.id) {
            Ok(i) => children[i] = child,
            Err(i) => children.insert(i, child),
        }
        self.with_children(children)
    }

    pub fn remove(&self, id: u32) -> Self {
        match self.children.binary_search_by_key(&id, |c| c.id) {
            Ok(i) => {
                let mut children = self.children.to_vec();
                children.remove(i);
                self.with_children(children)
            }
            Err(_) => self.clone(),
        }
    }

    /// Children of `self` whose ids are absent from `other`.
    pub fn subtract(&self, other: &ListResult) -> Self {
        let children = self
            .children
            .iter()
            .filter(|c| other.find(c.id).is_none())
            .cloned()
            .collect();
        self.with_children(children)
    }

    /// Combine with a freshly read list of the same directory.
    ///
    /// Entries present in both (by id) take the fresh value. A fresh entry
    /// whose id is unknown but whose name matches an entry only in `self`
    /// is the same file re-listed: it keeps the old id and takes the fresh
    /// name and attributes. Everything else from both sides is kept.
    pub fn merge(
        &self,
        fresh: &ListResult,
        case_sensitive: bool,
        name_of: impl Fn(u32) -> Option<Arc<str>>,
    ) -> Self {
        let old = &self.children;
        let new = &fresh.children;
        let mut merged = Vec::with_capacity(old.len() + new.len());
        let mut old_only = Vec::new();
        let mut new_only = Vec::new();

        let (mut i, mut j) = (0, 0);
        while i < old.len() && j < new.len() {
            match old[i].id.cmp(&new[j].id) {
                std::cmp::Ordering::Equal => {
                    merged.push(new[j].clone());
                    i += 1;
                    j += 1;
                }
                std::cmp::Ordering::Less => {
                    old_only.push(&old[i]);
                    i += 1;
                }
                std::cmp::Ordering::Greater => {
                    new_only.push(&new[j]);
                    j += 1;
                }
            }
        }
        old_only.extend(&old[i..]);
        new_only.extend(&new[j..]);

        let key = |name_id: u32| {
            name_of(name_id).map(|name| {
                if case_sensitive {
                    name.to_string()
                } else {
                    name.to_lowercase()
                }
            })
        };

        let mut matched_old = vec![false; old_only.len()];
        if !old_only.is_empty() && !new_only.is_empty() {
            let mut by_name: HashMap<String, usize> = HashMap::new();
            for (pos, child) in old_only.iter().enumerate() {
                if let Some(name) = key(child.name_id) {
                    by_name.entry(name).or_insert(pos);
                }
            }
            for child in &new_only {
                let hit = key(child.name_id).and_then(|name| by_name.remove(&name));
                match hit {
                    Some(pos) => {
                        matched_old[pos] = true;
                        merged.push(ChildInfo {
                            id: old_only[pos].id,
                            ..(*child).clone()
                        });
                    }
                    None => merged.push((*child).clone()),
                }
            }
        } else {
            merged.extend(new_only.iter().map(|c| (*c).clone()));
        }
        merged.extend(
            old_only
                .iter()
                .zip(&matched_old)
                .filter(|(_, matched)| !**matched)
                .map(|(c, _)| (*c).clone()),
        );

        merged.sort_by_key(|c| c.id);
        Self {
            mod_count: self.mod_count,
            complete: self.complete || fresh.complete,
            children: merged.into(),
        }
    }

    /// True if the parent has been modified since this list was read.
    pub fn children_were_changed_since_last_list(&self, current_mod_count: u64) -> bool {
        current_mod_count != self.mod_count
    }
}

impl PartialEq for ListResult {
    fn eq(&self, other: &Self) -> bool {
        self.mod_count == other.mod_count
            && self.complete == other.complete
            && self.children.len() == other.children.len()
            && self
                .children
                .iter()
                .zip(other.children.iter())
                .all(|(a, b)| a.id == b.id && a.name_id == b.name_id)
    }
}

impl Eq for ListResult {}
