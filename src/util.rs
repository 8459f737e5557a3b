const UPTIME_CONFIG: &str = "UPTIME_CONFIG";

const DEFAULT_CONFIG: &str = "./uptime.json";

pub fn get_config_path() -> String {
    std::env::var(UPTIME_CONFIG).unwrap_or_else(|_| DEFAULT_CONFIG.to_string())
}

const UPTIME_WORKERS: &str = "UPTIME_WORKERS";

/// Worker pool size override from the environment
pub fn get_workers() -> Option<usize> {
    std::env::var(UPTIME_WORKERS)
        .ok()
        .and_then(|res| res.parse().ok())
        .filter(|workers| *workers > 0)
}

/// Serde adapter storing a `Duration` as whole milliseconds
pub mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let ms = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(ms))
    }
}
