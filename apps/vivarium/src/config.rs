use crate::telemetry::logging::LogConfig;
use sim_proto::layout::DEFAULT_REGION_BYTES;

/// Smallest region we accept: enough for the producer prefix plus a token
/// consumer area.
pub const MIN_REGION_BYTES: usize = 128 * 1024;

#[derive(Debug, Clone)]
pub struct Config {
    /// Size of the shared-region backing file in bytes.
    pub region_bytes: usize,
    pub log: LogConfig,
}

impl Config {
    pub fn from_env() -> Self {
        let region_bytes = std::env::var("VIVARIUM_SHM_SIZE")
            .ok()
            .and_then(|raw| raw.trim().parse::<usize>().ok())
            .map(|bytes| bytes.max(MIN_REGION_BYTES))
            .unwrap_or(DEFAULT_REGION_BYTES);
        Self {
            region_bytes,
            log: LogConfig::default(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            region_bytes: DEFAULT_REGION_BYTES,
            log: LogConfig::default(),
        }
    }
}
