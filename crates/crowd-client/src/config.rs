use anyhow::{Context, Result};
use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::aggregate::DEFAULT_DANGER_THRESHOLD;
use crate::camera::CameraSettings;
use crate::error::{ClientError, ClientResult};
use crate::sync::DEFAULT_SYNC_TOLERANCE;

#[derive(Clone, Debug)]
pub struct Config {
    /// Detection backend base URL
    pub backend_url: String,
    /// Push channel URL
    pub ws_url: String,
    /// Address of the local view server
    pub bind_addr: String,
    /// Browser page served by the view server
    pub static_dir: Option<PathBuf>,
    pub request_timeout: Duration,
    /// Cadence of the live-camera capture loop
    pub capture_interval: Duration,
    pub danger_threshold: f64,
    pub sync_tolerance: f64,
    /// Whole-frame people count that triggers an overcrowding notice
    pub max_capacity: u32,
    /// Cap on replay entries; `None` keeps every event
    pub replay_capacity: Option<usize>,
    pub camera: CameraSettings,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            backend_url: "http://127.0.0.1:8000".to_string(),
            ws_url: "ws://127.0.0.1:8000/ws".to_string(),
            bind_addr: "127.0.0.1:8090".to_string(),
            static_dir: None,
            request_timeout: Duration::from_secs(120),
            capture_interval: Duration::from_millis(1000),
            danger_threshold: DEFAULT_DANGER_THRESHOLD,
            sync_tolerance: DEFAULT_SYNC_TOLERANCE,
            max_capacity: 50,
            replay_capacity: None,
            camera: CameraSettings::default(),
        }
    }
}

fn parsed<T>(key: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(key) {
        Ok(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .with_context(|| format!("invalid value for {}: {:?}", key, raw)),
        _ => Ok(None),
    }
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();

        let config = Self {
            backend_url: env::var("CROWDWATCH_BACKEND_URL").unwrap_or(defaults.backend_url),
            ws_url: env::var("CROWDWATCH_WS_URL").unwrap_or(defaults.ws_url),
            bind_addr: env::var("CROWDWATCH_BIND_ADDR").unwrap_or(defaults.bind_addr),
            static_dir: env::var("CROWDWATCH_STATIC_DIR").ok().map(PathBuf::from),
            request_timeout: parsed::<u64>("CROWDWATCH_REQUEST_TIMEOUT_SECS")?
                .map(Duration::from_secs)
                .unwrap_or(defaults.request_timeout),
            capture_interval: parsed::<u64>("CROWDWATCH_CAPTURE_INTERVAL_MS")?
                .map(Duration::from_millis)
                .unwrap_or(defaults.capture_interval),
            danger_threshold: parsed("CROWDWATCH_DANGER_THRESHOLD")?
                .unwrap_or(defaults.danger_threshold),
            sync_tolerance: parsed("CROWDWATCH_SYNC_TOLERANCE")?
                .unwrap_or(defaults.sync_tolerance),
            max_capacity: parsed("CROWDWATCH_MAX_CAPACITY")?.unwrap_or(defaults.max_capacity),
            replay_capacity: parsed("CROWDWATCH_REPLAY_CAPACITY")?,
            camera: CameraSettings {
                device: env::var("CROWDWATCH_CAMERA_DEVICE").unwrap_or(defaults.camera.device),
                input_format: env::var("CROWDWATCH_CAMERA_FORMAT").ok(),
                width: parsed("CROWDWATCH_CAMERA_WIDTH")?.unwrap_or(defaults.camera.width),
                quality: defaults.camera.quality,
            },
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> ClientResult<()> {
        if self.capture_interval.is_zero() {
            return Err(invalid("capture interval must be greater than zero"));
        }
        if !self.danger_threshold.is_finite() || self.danger_threshold < 0.0 {
            return Err(invalid("danger threshold must be a non-negative number"));
        }
        if !self.sync_tolerance.is_finite() || self.sync_tolerance < 0.0 {
            return Err(invalid("sync tolerance must be a non-negative number"));
        }
        if self.replay_capacity == Some(0) {
            return Err(invalid("replay capacity must be at least 1 when set"));
        }
        Ok(())
    }
}

fn invalid(reason: &str) -> ClientError {
    ClientError::Config(reason.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.capture_interval, Duration::from_millis(1000));
        assert_eq!(config.danger_threshold, 5.0);
        assert_eq!(config.sync_tolerance, 0.1);
        assert!(config.replay_capacity.is_none());
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let config = Config {
            capture_interval: Duration::ZERO,
            ..Config::default()
        };
        assert!(config.validate().is_err());

        let config = Config {
            danger_threshold: f64::NAN,
            ..Config::default()
        };
        assert!(config.validate().is_err());

        let config = Config {
            replay_capacity: Some(0),
            ..Config::default()
        };
        assert!(matches!(config.validate(), Err(ClientError::Config(_))));
    }

    #[test]
    fn test_from_env() {
        // all env handling in one test to avoid races between tests
        std::env::set_var("CROWDWATCH_BACKEND_URL", "http://detector:9000");
        std::env::set_var("CROWDWATCH_CAPTURE_INTERVAL_MS", "250");
        std::env::set_var("CROWDWATCH_REPLAY_CAPACITY", "500");
        std::env::set_var("CROWDWATCH_DANGER_THRESHOLD", "7.5");

        let config = Config::from_env().expect("config");
        assert_eq!(config.backend_url, "http://detector:9000");
        assert_eq!(config.capture_interval, Duration::from_millis(250));
        assert_eq!(config.replay_capacity, Some(500));
        assert_eq!(config.danger_threshold, 7.5);

        std::env::set_var("CROWDWATCH_MAX_CAPACITY", "lots");
        assert!(Config::from_env().is_err());

        for key in [
            "CROWDWATCH_BACKEND_URL",
            "CROWDWATCH_CAPTURE_INTERVAL_MS",
            "CROWDWATCH_REPLAY_CAPACITY",
            "CROWDWATCH_DANGER_THRESHOLD",
            "CROWDWATCH_MAX_CAPACITY",
        ] {
            std::env::remove_var(key);
        }
    }
}
