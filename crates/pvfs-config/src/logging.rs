//! Per-component tracing events for the record store.
//!
//! Every event is emitted under a `pvfs::<component>` target, so a single
//! component can be filtered with `RUST_LOG`, e.g. `RUST_LOG=pvfs::recovery=debug`.
//!
//! ```ignore
//! use pvfs_config::{log_recovery_warn, log_store_info};
//!
//! log_store_info!("Record store opened", records = 1234);
//! log_recovery_warn!("Records refer to lost names", id = 17);
//! ```

/// The parts of the store that log independently
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Component {
    /// Records, children lists, allocation
    Store,
    /// Self-check, recoverers, corruption marker
    Recovery,
    /// Background flusher
    Flush,
}

impl Component {
    pub const ALL: [Component; 3] = [Component::Store, Component::Recovery, Component::Flush];

    /// `tracing` target the component's events are emitted under
    pub const fn target(self) -> &'static str {
        match self {
            Component::Store => "pvfs::store",
            Component::Recovery => "pvfs::recovery",
            Component::Flush => "pvfs::flush",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    pub const fn as_str(self) -> &'static str {
        match self {
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        }
    }
}

#[doc(hidden)]
#[macro_export]
macro_rules! __pvfs_event {
    ($level:ident, $target:literal, $msg:literal $(, $key:ident = $value:expr)* $(,)?) => {
        ::tracing::$level!(target: $target, $($key = $value,)* $msg)
    };
}

#[macro_export]
macro_rules! log_store_error {
    ($($event:tt)+) => { $crate::__pvfs_event!(error, "pvfs::store", $($event)+) };
}

#[macro_export]
macro_rules! log_store_warn {
    ($($event:tt)+) => { $crate::__pvfs_event!(warn, "pvfs::store", $($event)+) };
}

#[macro_export]
macro_rules! log_store_info {
    ($($event:tt)+) => { $crate::__pvfs_event!(info, "pvfs::store", $($event)+) };
}

#[macro_export]
macro_rules! log_store_debug {
    ($($event:tt)+) => { $crate::__pvfs_event!(debug, "pvfs::store", $($event)+) };
}

#[macro_export]
macro_rules! log_recovery_error {
    ($($event:tt)+) => { $crate::__pvfs_event!(error, "pvfs::recovery", $($event)+) };
}

#[macro_export]
macro_rules! log_recovery_warn {
    ($($event:tt)+) => { $crate::__pvfs_event!(warn, "pvfs::recovery", $($event)+) };
}

#[macro_export]
macro_rules! log_recovery_info {
    ($($event:tt)+) => { $crate::__pvfs_event!(info, "pvfs::recovery", $($event)+) };
}

#[macro_export]
macro_rules! log_flush_warn {
    ($($event:tt)+) => { $crate::__pvfs_event!(warn, "pvfs::flush", $($event)+) };
}

#[macro_export]
macro_rules! log_flush_debug {
    ($($event:tt)+) => { $crate::__pvfs_event!(debug, "pvfs::flush", $($event)+) };
}

/// Filter directives enabling `level` for every store component.
///
/// Other crates stay at `warn` so dependencies do not drown the store's events.
pub fn default_directives(level: LogLevel) -> String {
    let mut directives = vec!["warn".to_string()];
    directives.extend(Component::ALL.iter().map(|c| format!("{}={}", c.target(), level.as_str())));
    directives.join(",")
}

/// Install the global fmt subscriber. `RUST_LOG` overrides `level`.
pub fn init_logging(level: LogLevel) {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directives(level)));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(true).init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_targets_share_prefix() {
        for component in Component::ALL {
            assert!(component.target().starts_with("pvfs::"));
        }
        assert_eq!(Component::Recovery.target(), "pvfs::recovery");
    }

    #[test]
    fn test_default_directives_cover_components() {
        let directives = default_directives(LogLevel::Debug);
        assert_eq!(directives, "warn,pvfs::store=debug,pvfs::recovery=debug,pvfs::flush=debug");
    }
}
