//! `info`, `check` and `roots`.

use anyhow::Result;
use console::{style, Emoji};
use pvfs_store::FsRecords;
use serde_json::json;

static CHECK: Emoji<'_, '_> = Emoji("✔ ", "[ok] ");
static CROSS: Emoji<'_, '_> = Emoji("✘ ", "[!!] ");
static DOT: Emoji<'_, '_> = Emoji("● ", "[-] ");

pub fn cmd_info(store: &FsRecords, json: bool) -> Result<()> {
    let conn = store.connection();
    let records = conn.records();
    let stats = conn.contents().stats();
    let versions = conn.storage_versions()?;

    if json {
        let versions: serde_json::Map<String, serde_json::Value> = versions
            .iter()
            .map(|(kind, version)| (kind.to_string(), json!(version)))
            .collect();
        let info = json!({
            "root": conn.root().display().to_string(),
            "state": conn.state().to_string(),
            "records": records.max_allocated_id(),
            "capacity": records.capacity(),
            "names": conn.names().len(),
            "indexed_names": store.name_index().len(),
            "roots": store.list_roots()?.len(),
            "global_mod_count": records.global_mod_count(),
            "error_count": records.error_count(),
            "created_at": records.created_at(),
            "closed_properly": records.was_closed_properly(),
            "versions": versions,
            "contents": {
                "blobs": stats.blob_count,
                "bytes": stats.total_bytes,
                "avg_blob_size": stats.avg_blob_size(),
            },
        });
        println!("{}", serde_json::to_string_pretty(&info)?);
        return Ok(());
    }

    println!("{}", style("pvfs store").bold().cyan());
    println!("{}", style("─".repeat(40)).dim());
    println!("  Root:           {}", conn.root().display());
    println!("  State:          {}", conn.state());
    println!(
        "  Records:        {} of {} slots",
        records.max_allocated_id(),
        records.capacity()
    );
    println!("  Names:          {}", conn.names().len());
    println!("  Roots:          {}", store.list_roots()?.len());
    println!("  Mod count:      {}", records.global_mod_count());
    let errors = records.error_count();
    if errors == 0 {
        println!("  Errors:         {}", style(errors).green());
    } else {
        println!("  Errors:         {}", style(errors).red());
    }
    println!(
        "  Contents:       {} blobs, {} bytes",
        stats.blob_count, stats.total_bytes
    );
    let versions: Vec<String> = versions.iter().map(|(k, v)| format!("{}={}", k, v)).collect();
    println!("  Versions:       {}", versions.join(" "));
    Ok(())
}

pub fn cmd_check(store: &FsRecords) -> Result<()> {
    eprintln!("{}", style("Checking store").bold());
    let problems = store.check_sanity()?;
    if problems.is_empty() {
        eprintln!("  {} {}", CHECK, style("No problems found").green());
        return Ok(());
    }
    for problem in &problems {
        eprintln!("  {} {}", CROSS, style(problem).red());
    }
    eprintln!("  {} {}", DOT, style("Restart to rebuild damaged storages").dim());
    anyhow::bail!("{} problem(s) found", problems.len())
}

pub fn cmd_roots(store: &FsRecords, json: bool) -> Result<()> {
    let mut rows = Vec::new();
    for root in store.list_roots()? {
        let url = store.connection().names().name_of(root.url_id)?;
        rows.push((root.id, url));
    }

    if json {
        let out: Vec<_> = rows
            .iter()
            .map(|(id, url)| json!({ "id": id, "url": url.as_ref() }))
            .collect();
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }
    for (id, url) in rows {
        println!("{:>8}  {}", style(id).dim(), url);
    }
    Ok(())
}
