/// Domain-aware logging macros.
///
/// Each macro injects a `domain` field so log consumers can filter by area
/// without parsing messages. Domains:
///
/// - `sys`  engine lifecycle, signals, task groups
/// - `conn` source connection, reconnects
/// - `pipe` ingest and pipeline batches, sinks, checkpoints
/// - `res`  feed occupancy, metrics snapshots
/// - `conf` configuration loading
///
/// ```ignore
/// rk_info!(sys, pipelines = 3, "engine bootstrap complete");
/// rk_warn!(pipe, pipeline = %id, error = %e, "sink write failed");
/// rk_debug!(conn, offset = next, "source seeked");
/// ```
///
/// The domain is a bare identifier, not a string.

#[doc(hidden)]
macro_rules! rk_log {
    ($level:ident, $domain:ident, $($field:tt)*) => {
        tracing::$level!(domain = stringify!($domain), $($field)*)
    };
}

macro_rules! rk_error {
    ($domain:ident, $($rest:tt)*) => {
        rk_log!(error, $domain, $($rest)*)
    };
}

macro_rules! rk_warn {
    ($domain:ident, $($rest:tt)*) => {
        rk_log!(warn, $domain, $($rest)*)
    };
}

macro_rules! rk_info {
    ($domain:ident, $($rest:tt)*) => {
        rk_log!(info, $domain, $($rest)*)
    };
}

macro_rules! rk_debug {
    ($domain:ident, $($rest:tt)*) => {
        rk_log!(debug, $domain, $($rest)*)
    };
}

#[allow(unused_macros)]
macro_rules! rk_trace {
    ($domain:ident, $($rest:tt)*) => {
        rk_log!(trace, $domain, $($rest)*)
    };
}
