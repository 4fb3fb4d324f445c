//! Severity-tagged logging port.
//!
//! The reorg guard emits exactly one line per decision through this
//! interface, at the severity that matches its counters.

/// Four-severity formatted-output collaborator.
pub trait ChainLogger: Send + Sync {
    fn info(&self, msg: &str);
    fn warn(&self, msg: &str);
    fn error(&self, msg: &str);
    fn critical(&self, msg: &str);
}

/// Default logger backed by `tracing`. Critical events go out at the error
/// level with a marker field so subscribers can route them separately.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingLogger;

impl ChainLogger for TracingLogger {
    fn info(&self, msg: &str) {
        tracing::info!("{msg}");
    }

    fn warn(&self, msg: &str) {
        tracing::warn!("{msg}");
    }

    fn error(&self, msg: &str) {
        tracing::error!("{msg}");
    }

    fn critical(&self, msg: &str) {
        tracing::error!(critical = true, "{msg}");
    }
}

/// Silent logger for tests.
#[derive(Debug, Default, Clone, Copy)]
pub struct NopLogger;

impl ChainLogger for NopLogger {
    fn info(&self, _msg: &str) {}
    fn warn(&self, _msg: &str) {}
    fn error(&self, _msg: &str) {}
    fn critical(&self, _msg: &str) {}
}
