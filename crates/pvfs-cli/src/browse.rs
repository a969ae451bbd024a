//! `ls`, `cat` and `find`, plus resolving user-supplied targets to record ids.

use std::io::Write;

use anyhow::{anyhow, bail, Result};
use console::style;
use pvfs_store::{FsRecords, RecordFlags};
use serde_json::json;

/// Resolve `target` as a record id or as `<root url>/<path>`.
///
/// The longest matching root url wins.
pub fn resolve(store: &FsRecords, target: &str) -> Result<u32> {
    if let Ok(id) = target.parse::<u32>() {
        store.connection().records().check_id(id)?;
        return Ok(id);
    }

    let names = store.connection().names();
    let mut best: Option<(u32, usize)> = None;
    for root in store.list_roots()? {
        let url = names.name_of(root.url_id)?;
        let url = url.trim_end_matches('/');
        let matches = target == url || target.strip_prefix(url).is_some_and(|rest| rest.starts_with('/'));
        if matches && best.map_or(true, |(_, len)| url.len() > len) {
            best = Some((root.id, url.len()));
        }
    }
    let (mut current, prefix) = best.ok_or_else(|| anyhow!("no root matches {}", target))?;

    for segment in target[prefix..].split('/').filter(|s| !s.is_empty()) {
        let name_id = names
            .find(segment)
            .ok_or_else(|| anyhow!("{} not found under {}", segment, store.path(current).unwrap_or_default()))?;
        let list = store.list(current)?;
        current = list
            .find_by_name(name_id)
            .map(|child| child.id)
            .ok_or_else(|| anyhow!("{} not found under {}", segment, store.path(current).unwrap_or_default()))?;
    }
    Ok(current)
}

pub fn cmd_ls(store: &FsRecords, target: &str, json: bool) -> Result<()> {
    let id = resolve(store, target)?;
    let list = store.list(id)?;
    let names = store.connection().names();

    if json {
        let children: Vec<_> = list
            .children()
            .iter()
            .map(|child| {
                let attrs = child.attributes.unwrap_or_default();
                json!({
                    "id": child.id,
                    "name": names.get(child.name_id).as_deref(),
                    "directory": attrs.is_directory(),
                    "length": attrs.length,
                    "timestamp": attrs.timestamp,
                    "symlink_target": child.symlink_target.as_deref(),
                })
            })
            .collect();
        let out = json!({
            "id": id,
            "mod_count": list.mod_count(),
            "complete": list.is_complete(),
            "children": children,
        });
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    for child in list.children() {
        let attrs = child.attributes.unwrap_or_default();
        let name = names.get(child.name_id).unwrap_or_else(|| "?".into());
        let kind = if attrs.is_directory() {
            style("d").blue()
        } else if attrs.flags.contains(RecordFlags::SYMLINK) {
            style("l").cyan()
        } else {
            style("-").dim()
        };
        match &child.symlink_target {
            Some(target) => println!("{} {:>8} {:>12}  {} -> {}", kind, child.id, attrs.length, name, target),
            None => println!("{} {:>8} {:>12}  {}", kind, child.id, attrs.length, name),
        }
    }
    if !list.is_complete() {
        eprintln!("{}", style("(listing incomplete)").dim());
    }
    Ok(())
}

pub fn cmd_cat(store: &FsRecords, target: &str) -> Result<()> {
    let id = resolve(store, target)?;
    let Some(bytes) = store.read_content(id)? else {
        bail!("record {} has no stored content", id);
    };
    let mut stdout = std::io::stdout().lock();
    stdout.write_all(&bytes)?;
    stdout.flush()?;
    Ok(())
}

pub fn cmd_find(store: &FsRecords, names: &[String]) -> Result<()> {
    let names: Vec<&str> = names.iter().map(String::as_str).collect();
    let mut ids = Vec::new();
    store.for_each_file_with_name(&names, |id| {
        ids.push(id);
        true
    });
    ids.sort_unstable();
    for id in ids {
        println!("{:>8}  {}", style(id).dim(), store.path(id)?);
    }
    Ok(())
}
