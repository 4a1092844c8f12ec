use std::time::Duration;

pub const DEFAULT_MAX_ACTIVE: usize = 4;
pub const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 60_000;
pub const DEFAULT_LOG_FILTER: &str = "info,scene_worker=debug";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerConfig {
    pub max_active: usize,
    pub request_timeout: Duration,
    /// When set, the connection is initialized at startup instead of waiting for the host.
    pub base_url: Option<String>,
    pub correlation_id: Option<String>,
    pub log_filter: String,
}

impl WorkerConfig {
    pub fn from_env() -> Self {
        let max_active = std::env::var("SCENE_WORKER_MAX_ACTIVE")
            .ok()
            .and_then(|v| v.parse().ok())
            .filter(|v: &usize| *v > 0)
            .unwrap_or(DEFAULT_MAX_ACTIVE);
        let request_timeout_ms = std::env::var("SCENE_WORKER_REQUEST_TIMEOUT_MS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(DEFAULT_REQUEST_TIMEOUT_MS);
        let base_url = std::env::var("SCENE_WORKER_BASE_URL")
            .ok()
            .filter(|v| !v.trim().is_empty());
        let correlation_id = std::env::var("SCENE_WORKER_CORRELATION_ID")
            .ok()
            .filter(|v| !v.trim().is_empty());
        let log_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| DEFAULT_LOG_FILTER.into());
        Self {
            max_active,
            request_timeout: Duration::from_millis(request_timeout_ms),
            base_url,
            correlation_id,
            log_filter,
        }
    }
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            max_active: DEFAULT_MAX_ACTIVE,
            request_timeout: Duration::from_millis(DEFAULT_REQUEST_TIMEOUT_MS),
            base_url: None,
            correlation_id: None,
            log_filter: DEFAULT_LOG_FILTER.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;
    use std::sync::Mutex;

    // Environment variables are process-wide; keep these tests from interleaving.
    static ENV_MUTEX: Mutex<()> = Mutex::new(());

    const KEYS: [&str; 4] = [
        "SCENE_WORKER_MAX_ACTIVE",
        "SCENE_WORKER_REQUEST_TIMEOUT_MS",
        "SCENE_WORKER_BASE_URL",
        "SCENE_WORKER_CORRELATION_ID",
    ];

    fn clear() {
        for key in KEYS {
            env::remove_var(key);
        }
    }

    #[test]
    fn defaults_when_unset() {
        let _lock = ENV_MUTEX.lock().unwrap();
        clear();
        let cfg = WorkerConfig::from_env();
        assert_eq!(cfg.max_active, DEFAULT_MAX_ACTIVE);
        assert_eq!(cfg.request_timeout, Duration::from_secs(60));
        assert!(cfg.base_url.is_none());
        assert!(cfg.correlation_id.is_none());
    }

    #[test]
    fn reads_overrides() {
        let _lock = ENV_MUTEX.lock().unwrap();
        clear();
        env::set_var("SCENE_WORKER_MAX_ACTIVE", "9");
        env::set_var("SCENE_WORKER_REQUEST_TIMEOUT_MS", "1500");
        env::set_var("SCENE_WORKER_BASE_URL", "https://assets.example/api");
        env::set_var("SCENE_WORKER_CORRELATION_ID", "corr-7");
        let cfg = WorkerConfig::from_env();
        clear();
        assert_eq!(cfg.max_active, 9);
        assert_eq!(cfg.request_timeout, Duration::from_millis(1500));
        assert_eq!(cfg.base_url.as_deref(), Some("https://assets.example/api"));
        assert_eq!(cfg.correlation_id.as_deref(), Some("corr-7"));
    }

    #[test]
    fn zero_or_garbage_max_active_falls_back() {
        let _lock = ENV_MUTEX.lock().unwrap();
        clear();
        env::set_var("SCENE_WORKER_MAX_ACTIVE", "0");
        assert_eq!(WorkerConfig::from_env().max_active, DEFAULT_MAX_ACTIVE);
        env::set_var("SCENE_WORKER_MAX_ACTIVE", "many");
        assert_eq!(WorkerConfig::from_env().max_active, DEFAULT_MAX_ACTIVE);
        clear();
    }
}
