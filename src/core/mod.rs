pub(crate) mod config;
pub(crate) mod errors;
pub(crate) mod metrics;
pub(crate) mod redis;
pub(crate) mod shutdown;
pub(crate) mod telemetry;
pub(crate) mod time;
