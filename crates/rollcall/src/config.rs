use chrono::FixedOffset;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// Config file read from the working directory when `ROLLCALL_CONFIG` is unset.
const DEFAULT_CONFIG_FILE: &str = "rollcall.toml";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Process configuration: defaults, then `rollcall.toml`, then `ROLLCALL_*` variables.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Endpoint returning one JPEG still per GET.
    pub camera_url: String,
    /// Endpoint that blinks the flash LED.
    pub flash_url: String,
    /// Directory of reference photos, one identity per file.
    pub gallery_dir: PathBuf,
    /// Directory receiving one attendance CSV per run.
    pub attendance_dir: PathBuf,
    /// Directory containing `det_10g.onnx` and `w600k_r50.onnx`.
    pub model_dir: PathBuf,
    /// TrueType font for overlay labels.
    pub font_path: PathBuf,
    /// Spreadsheet document ID; the mirror is disabled when unset.
    pub sheet_id: Option<String>,
    pub sheet_worksheet: String,
    /// Service-account key file (JSON).
    pub sheet_credentials: PathBuf,
    /// Offset of the attendance clock from UTC (345 = +05:45).
    pub utc_offset_minutes: i32,
    pub fetch_timeout_secs: u64,
    pub flash_timeout_secs: u64,
    pub flash_debounce_ms: u64,
    /// Maximum embedding distance accepted as a match.
    pub match_tolerance: f32,
    /// Detection runs on the frame shrunk by this integer factor.
    pub downscale: u32,
    /// Pause after a dropped frame.
    pub retry_delay_ms: u64,
    /// Run without a preview window.
    pub headless: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            camera_url: "http://192.168.2.200/cam-hi.jpg".to_string(),
            flash_url: "http://192.168.2.200/flash".to_string(),
            gallery_dir: PathBuf::from("image_folder"),
            attendance_dir: PathBuf::from("attendance"),
            model_dir: PathBuf::from("models"),
            font_path: PathBuf::from("/usr/share/fonts/truetype/dejavu/DejaVuSans.ttf"),
            sheet_id: None,
            sheet_worksheet: "Sheet1".to_string(),
            sheet_credentials: PathBuf::from("credentials.json"),
            utc_offset_minutes: 5 * 60 + 45,
            fetch_timeout_secs: 5,
            flash_timeout_secs: 2,
            flash_debounce_ms: 1000,
            match_tolerance: rollcall_core::DEFAULT_MATCH_TOLERANCE,
            downscale: 4,
            retry_delay_ms: 250,
            headless: false,
        }
    }
}

impl Config {
    /// Load the configuration for this process.
    ///
    /// A file named by `ROLLCALL_CONFIG` must exist; the default
    /// `rollcall.toml` is optional.
    pub fn load() -> Result<Self, ConfigError> {
        let explicit = std::env::var("ROLLCALL_CONFIG").ok().map(PathBuf::from);
        let mut config = match &explicit {
            Some(path) => Self::from_file(path)?,
            None => {
                let path = Path::new(DEFAULT_CONFIG_FILE);
                if path.exists() {
                    Self::from_file(path)?
                } else {
                    Self::default()
                }
            }
        };

        config.apply_env(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config = toml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        tracing::debug!(path = %path.display(), "loaded config file");
        Ok(config)
    }

    /// Override fields from `ROLLCALL_*` variables. Unparseable values keep the prior setting.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let string = |key: &str, field: &mut String| {
            if let Some(v) = lookup(key) {
                *field = v;
            }
        };
        string("ROLLCALL_CAMERA_URL", &mut self.camera_url);
        string("ROLLCALL_FLASH_URL", &mut self.flash_url);
        string("ROLLCALL_SHEET_WORKSHEET", &mut self.sheet_worksheet);

        let path = |key: &str, field: &mut PathBuf| {
            if let Some(v) = lookup(key) {
                *field = PathBuf::from(v);
            }
        };
        path("ROLLCALL_GALLERY_DIR", &mut self.gallery_dir);
        path("ROLLCALL_ATTENDANCE_DIR", &mut self.attendance_dir);
        path("ROLLCALL_MODEL_DIR", &mut self.model_dir);
        path("ROLLCALL_FONT_PATH", &mut self.font_path);
        path("ROLLCALL_SHEET_CREDENTIALS", &mut self.sheet_credentials);

        if let Some(id) = lookup("ROLLCALL_SHEET_ID") {
            self.sheet_id = Some(id).filter(|s| !s.is_empty());
        }

        self.utc_offset_minutes = parse_var(&lookup, "ROLLCALL_UTC_OFFSET_MINUTES", self.utc_offset_minutes);
        self.fetch_timeout_secs = parse_var(&lookup, "ROLLCALL_FETCH_TIMEOUT_SECS", self.fetch_timeout_secs);
        self.flash_timeout_secs = parse_var(&lookup, "ROLLCALL_FLASH_TIMEOUT_SECS", self.flash_timeout_secs);
        self.flash_debounce_ms = parse_var(&lookup, "ROLLCALL_FLASH_DEBOUNCE_MS", self.flash_debounce_ms);
        self.match_tolerance = parse_var(&lookup, "ROLLCALL_MATCH_TOLERANCE", self.match_tolerance);
        self.downscale = parse_var(&lookup, "ROLLCALL_DOWNSCALE", self.downscale);
        self.retry_delay_ms = parse_var(&lookup, "ROLLCALL_RETRY_DELAY_MS", self.retry_delay_ms);
        if let Some(v) = lookup("ROLLCALL_HEADLESS") {
            self.headless = v != "0" && !v.eq_ignore_ascii_case("false");
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.downscale == 0 {
            return Err(ConfigError::Invalid("downscale must be at least 1".into()));
        }
        if self.match_tolerance.is_nan() || self.match_tolerance <= 0.0 {
            return Err(ConfigError::Invalid(format!(
                "match_tolerance must be positive, got {}",
                self.match_tolerance
            )));
        }
        self.utc_offset()?;
        Ok(())
    }

    /// Timezone of the attendance clock.
    pub fn utc_offset(&self) -> Result<FixedOffset, ConfigError> {
        self.utc_offset_minutes
            .checked_mul(60)
            .and_then(FixedOffset::east_opt)
            .ok_or_else(|| {
                ConfigError::Invalid(format!("utc_offset_minutes out of range: {}", self.utc_offset_minutes))
            })
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }

    pub fn flash_timeout(&self) -> Duration {
        Duration::from_secs(self.flash_timeout_secs)
    }

    pub fn flash_debounce(&self) -> Duration {
        Duration::from_millis(self.flash_debounce_ms)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }
}

fn parse_var<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str, current: T) -> T {
    match lookup(key) {
        Some(raw) => raw.trim().parse().unwrap_or_else(|_| {
            tracing::warn!(key, value = %raw, "ignoring unparseable environment override");
            current
        }),
        None => current,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> =
            pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults_match_device_layout() {
        let config = Config::default();
        assert_eq!(config.camera_url, "http://192.168.2.200/cam-hi.jpg");
        assert_eq!(config.flash_url, "http://192.168.2.200/flash");
        assert_eq!(config.downscale, 4);
        assert_eq!(config.fetch_timeout(), Duration::from_secs(5));
        assert_eq!(config.flash_timeout(), Duration::from_secs(2));
        assert_eq!(config.flash_debounce(), Duration::from_secs(1));
        assert_eq!(config.utc_offset().unwrap().local_minus_utc(), 5 * 3600 + 45 * 60);
        assert!(config.sheet_id.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_toml_overrides_some_fields() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rollcall.toml");
        std::fs::write(
            &path,
            "camera_url = \"http://10.0.0.5/cam-lo.jpg\"\nsheet_id = \"abc123\"\nheadless = true\n",
        )
        .unwrap();

        let config = Config::from_file(&path).unwrap();
        assert_eq!(config.camera_url, "http://10.0.0.5/cam-lo.jpg");
        assert_eq!(config.sheet_id.as_deref(), Some("abc123"));
        assert!(config.headless);
        assert_eq!(config.sheet_worksheet, "Sheet1");
    }

    #[test]
    fn test_toml_unknown_key_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rollcall.toml");
        std::fs::write(&path, "camera = \"typo\"\n").unwrap();
        assert!(matches!(Config::from_file(&path), Err(ConfigError::Parse { .. })));
    }

    #[test]
    fn test_env_overrides() {
        let mut config = Config::default();
        config.apply_env(env(&[
            ("ROLLCALL_CAMERA_URL", "http://cam.local/still.jpg"),
            ("ROLLCALL_MATCH_TOLERANCE", "0.6"),
            ("ROLLCALL_DOWNSCALE", "not-a-number"),
            ("ROLLCALL_SHEET_ID", "doc-1"),
            ("ROLLCALL_HEADLESS", "1"),
        ]));

        assert_eq!(config.camera_url, "http://cam.local/still.jpg");
        assert!((config.match_tolerance - 0.6).abs() < 1e-6);
        assert_eq!(config.downscale, 4, "bad value keeps the default");
        assert_eq!(config.sheet_id.as_deref(), Some("doc-1"));
        assert!(config.headless);
    }

    #[test]
    fn test_empty_sheet_id_disables_mirror() {
        let mut config = Config { sheet_id: Some("doc".into()), ..Config::default() };
        config.apply_env(env(&[("ROLLCALL_SHEET_ID", "")]));
        assert!(config.sheet_id.is_none());
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let zero = Config { downscale: 0, ..Config::default() };
        assert!(zero.validate().is_err());

        let offset = Config { utc_offset_minutes: 24 * 60, ..Config::default() };
        assert!(offset.validate().is_err());

        // 40_000_000 * 60 overflows i32; it must be rejected, not wrapped.
        let huge = Config { utc_offset_minutes: 40_000_000, ..Config::default() };
        assert!(matches!(huge.validate(), Err(ConfigError::Invalid(_))));
        let most_negative = Config { utc_offset_minutes: i32::MIN, ..Config::default() };
        assert!(most_negative.utc_offset().is_err());

        let tolerance = Config { match_tolerance: f32::NAN, ..Config::default() };
        assert!(tolerance.validate().is_err());
    }
}
