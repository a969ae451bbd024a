//! Startup self-check, recovery strategies and corruption bookkeeping.

use std::backtrace::Backtrace;
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use parking_lot::RwLock;
use pvfs_config::{log_recovery_error, log_recovery_info, log_recovery_warn};

use crate::connection::Connection;
use crate::error::{ErrorCategory, Result};
use crate::layout::{RecordField, RecordFlags};

/// File whose presence forces a full rebuild at the next start
pub const CORRUPTION_MARKER_FILE: &str = "corruption.marker";

/// Record why the store must be rebuilt. The first reason wins.
pub fn write_marker(root: &Path, category: ErrorCategory, message: &str) -> Result<()> {
    let path = root.join(CORRUPTION_MARKER_FILE);
    if path.exists() {
        return Ok(());
    }
    let time = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or(0);
    let body = format!(
        "category: {}\nmessage: {}\ntime: {}\nbacktrace:\n{}\n",
        category,
        message,
        time,
        Backtrace::force_capture()
    );
    std::fs::write(&path, body)?;
    Ok(())
}

pub fn read_marker(root: &Path) -> Option<String> {
    std::fs::read_to_string(root.join(CORRUPTION_MARKER_FILE)).ok()
}

pub fn remove_marker(root: &Path) -> Result<()> {
    match std::fs::remove_file(root.join(CORRUPTION_MARKER_FILE)) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

/// One issue found by the self-check
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Problem {
    pub category: ErrorCategory,
    pub detail: String,
}

impl Problem {
    fn new(category: ErrorCategory, detail: impl Into<String>) -> Self {
        Self {
            category,
            detail: detail.into(),
        }
    }
}

impl fmt::Display for Problem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.category, self.detail)
    }
}

/// Cross-check the storages of a loaded connection.
///
/// Each category is reported at most once.
pub fn self_check(conn: &Connection) -> Result<Vec<Problem>> {
    let mut problems = Vec::new();
    let records = conn.records();

    if !records.was_closed_properly() {
        problems.push(Problem::new(ErrorCategory::NotClosedProperly, "previous session did not close"));
    }
    if let Some(damage) = conn.contents().damage() {
        problems.push(Problem::new(ErrorCategory::ContentStorageMismatch, damage));
    }
    if let Some(damage) = conn.names().damage() {
        problems.push(Problem::new(ErrorCategory::NameStorageIncomplete, damage));
    }

    let names = conn.names().len();
    let contents = conn.contents().len();
    let max = records.max_allocated_id();
    let (mut dangling_name, mut dangling_content, mut dangling_parent) = (None, None, None);
    records.for_each(|id, record| {
        if record.name_id > names && dangling_name.is_none() {
            dangling_name = Some(format!("record {} names id {} of {}", id, record.name_id, names));
        }
        if record.content_ref > contents && dangling_content.is_none() {
            dangling_content = Some(format!("record {} refers to content {} of {}", id, record.content_ref, contents));
        }
        if record.parent_id > max && dangling_parent.is_none() {
            dangling_parent = Some(format!("record {} has parent {} of {}", id, record.parent_id, max));
        }
        true
    })?;

    let mut push_once = |category: ErrorCategory, detail: Option<String>| {
        if let Some(detail) = detail {
            if !problems.iter().any(|p| p.category == category) {
                problems.push(Problem::new(category, detail));
            }
        }
    };
    push_once(ErrorCategory::NameStorageIncomplete, dangling_name);
    push_once(ErrorCategory::ContentStorageMismatch, dangling_content);
    push_once(ErrorCategory::ChildrenCorrupted, dangling_parent);

    Ok(problems)
}

/// A fix for one category of problem
pub trait Recoverer: Send + Sync {
    fn name(&self) -> &'static str;

    fn handles(&self, category: ErrorCategory) -> bool;

    /// Returns true if the problem no longer needs a rebuild.
    fn recover(&self, conn: &Connection, problem: &Problem) -> Result<bool>;
}

/// Records are mapped and attributes are transactional, so an unclean
/// shutdown alone leaves nothing to repair; the other checks catch the rest.
pub struct NotClosedProperlyRecoverer;

impl Recoverer for NotClosedProperlyRecoverer {
    fn name(&self) -> &'static str {
        "not-closed-properly"
    }

    fn handles(&self, category: ErrorCategory) -> bool {
        category == ErrorCategory::NotClosedProperly
    }

    fn recover(&self, _conn: &Connection, _problem: &Problem) -> Result<bool> {
        log_recovery_info!("Accepting store after unclean shutdown");
        Ok(true)
    }
}

/// Drops the damaged content tail and makes referencing records reload.
pub struct ContentStorageRecoverer;

impl Recoverer for ContentStorageRecoverer {
    fn name(&self) -> &'static str {
        "content-storage"
    }

    fn handles(&self, category: ErrorCategory) -> bool {
        category == ErrorCategory::ContentStorageMismatch
    }

    fn recover(&self, conn: &Connection, _problem: &Problem) -> Result<bool> {
        if conn.contents().damage().is_some() {
            conn.contents().repair()?;
        }
        let valid = conn.contents().len();
        let records = conn.records();
        let mut stale = Vec::new();
        records.for_each(|id, record| {
            if record.content_ref > valid {
                stale.push(id);
            }
            true
        })?;
        for &id in &stale {
            records.write_field(id, RecordField::ContentRef, 0)?;
            records.update_flags(id, |f| {
                f | RecordFlags::MUST_RELOAD_CONTENT | RecordFlags::MUST_RELOAD_LENGTH
            })?;
        }
        log_recovery_info!("Content references reset", records = stale.len() as u64);
        Ok(true)
    }
}

/// A torn names tail can be dropped only if no record points into it.
pub struct NameStorageRecoverer;

impl Recoverer for NameStorageRecoverer {
    fn name(&self) -> &'static str {
        "name-storage"
    }

    fn handles(&self, category: ErrorCategory) -> bool {
        category == ErrorCategory::NameStorageIncomplete
    }

    fn recover(&self, conn: &Connection, _problem: &Problem) -> Result<bool> {
        let names = conn.names().len();
        let mut dangling = false;
        conn.records().for_each(|_, record| {
            dangling = record.name_id > names;
            !dangling
        })?;
        if dangling {
            log_recovery_warn!("Records refer to lost names; rebuild required");
            return Ok(false);
        }
        if conn.names().damage().is_some() {
            conn.names().repair()?;
        }
        Ok(true)
    }
}

/// Recoverers in the order they are tried
pub fn default_recoverers() -> Vec<Box<dyn Recoverer>> {
    vec![
        Box::new(NotClosedProperlyRecoverer),
        Box::new(ContentStorageRecoverer),
        Box::new(NameStorageRecoverer),
    ]
}

/// Run every applicable recoverer; returns the problems left unfixed.
pub fn recover(conn: &Connection, problems: Vec<Problem>, recoverers: &[Box<dyn Recoverer>]) -> Result<Vec<Problem>> {
    let mut leftover = Vec::new();
    for problem in problems {
        let mut fixed = false;
        for recoverer in recoverers.iter().filter(|r| r.handles(problem.category)) {
            match recoverer.recover(conn, &problem) {
                Ok(true) => {
                    log_recovery_info!(
                        "Problem fixed",
                        recoverer = recoverer.name(),
                        problem = tracing::field::display(&problem)
                    );
                    fixed = true;
                    break;
                }
                Ok(false) => {}
                Err(e) => {
                    log_recovery_error!(
                        "Recoverer failed",
                        recoverer = recoverer.name(),
                        error = tracing::field::display(&e)
                    );
                }
            }
        }
        if !fixed {
            leftover.push(problem);
        }
    }
    Ok(leftover)
}

/// How urgently a restart is needed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// The store will rebuild at the next start.
    ConsiderRestart,
    /// Too many faults accumulated to keep going.
    RestartNow,
}

#[derive(Debug, Clone)]
pub struct CorruptionNotice {
    pub category: ErrorCategory,
    pub message: String,
    /// Faults recorded in the store header so far
    pub total_errors: u32,
    pub severity: Severity,
}

/// Receives corruption notices, e.g. to prompt the user to restart
pub trait CorruptionListener: Send + Sync {
    fn on_corruption(&self, notice: &CorruptionNotice);
}

impl<F> CorruptionListener for F
where
    F: Fn(&CorruptionNotice) + Send + Sync,
{
    fn on_corruption(&self, notice: &CorruptionNotice) {
        self(notice)
    }
}

/// Escalates repeated faults past a threshold
pub struct ErrorTracker {
    threshold: u32,
    listener: RwLock<Option<Arc<dyn CorruptionListener>>>,
}

impl ErrorTracker {
    pub fn new(threshold: u32) -> Self {
        Self {
            threshold,
            listener: RwLock::new(None),
        }
    }

    pub fn set_listener(&self, listener: Arc<dyn CorruptionListener>) {
        *self.listener.write() = Some(listener);
    }

    pub fn notify(&self, category: ErrorCategory, message: &str, total_errors: u32) -> CorruptionNotice {
        let severity = if total_errors > self.threshold {
            Severity::RestartNow
        } else {
            Severity::ConsiderRestart
        };
        let notice = CorruptionNotice {
            category,
            message: message.to_string(),
            total_errors,
            severity,
        };
        let listener = self.listener.read().clone();
        if let Some(listener) = listener {
            listener.on_corruption(&notice);
        }
        notice
    }
}
