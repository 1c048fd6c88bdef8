//! Configuration for trawl.
//!
//! Values are layered with [`figment`], later layers overriding earlier ones:
//!
//! 1. Built-in defaults ([`Config::default()`]).
//! 2. A configuration file: the one given explicitly, otherwise
//!    `trawl.toml` in the platform configuration directory if it exists.
//!    TOML, YAML and JSON are recognised by extension.
//! 3. Environment variables prefixed with `TRAWL_`, nesting with `__`
//!    (`TRAWL_S3__KEY_ID` sets `s3.key_id`).
//! 4. Command-line [`Overrides`].

pub mod error;

use crate::error::{ErrorKind, Result};
use directories::ProjectDirs;
use exn::ResultExt;
use figment::Figment;
use figment::providers::{Env, Format, Json, Serialized, Toml, Yaml};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const ENV_PREFIX: &str = "TRAWL_";
pub const DEFAULT_BASE_URL: &str = "https://download.bls.gov/pub/time.series/pr/";
pub const DEFAULT_PREFIX: &str = "bls/pr";
pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (compatible; bls-pr-sync/1.0; +https://download.bls.gov/)";
pub const DEFAULT_REQUEST_DELAY_SECS: f64 = 0.5;
pub const DEFAULT_REGION: &str = "us-east-1";
const CONFIG_FILE_NAME: &str = "trawl.toml";

/// Everything a sync run needs to know.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Destination bucket.
    pub bucket: String,
    /// Key prefix that mirrored files are stored under.
    pub prefix: String,
    /// Directory index page to mirror.
    pub base_url: String,
    /// `User-Agent` sent with every remote request.
    pub user_agent: String,
    /// Seconds to wait after the listing fetch and after every probe.
    pub request_delay: f64,
    /// Delete mirrored objects that no longer exist remotely.
    pub delete_missing: bool,
    /// Report what would change without transferring or deleting anything.
    pub dry_run: bool,
    pub s3: S3Config,
}
impl Default for Config {
    fn default() -> Self {
        Self {
            bucket: String::new(),
            prefix: DEFAULT_PREFIX.to_string(),
            base_url: DEFAULT_BASE_URL.to_string(),
            user_agent: DEFAULT_USER_AGENT.to_string(),
            request_delay: DEFAULT_REQUEST_DELAY_SECS,
            delete_missing: false,
            dry_run: false,
            s3: S3Config::default(),
        }
    }
}

/// Connection details for the destination store.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct S3Config {
    pub region: String,
    /// Custom endpoint for S3-compatible services (Backblaze, MinIO, ...).
    pub endpoint: Option<String>,
    pub key_id: Option<String>,
    pub key_secret: Option<String>,
    pub session_token: Option<String>,
}
impl Default for S3Config {
    fn default() -> Self {
        Self {
            region: DEFAULT_REGION.to_string(),
            endpoint: None,
            key_id: None,
            key_secret: None,
            session_token: None,
        }
    }
}
// Keep secrets out of logs.
impl fmt::Debug for S3Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let redact = |value: &Option<String>| value.as_ref().map(|_| "<redacted>");
        f.debug_struct("S3Config")
            .field("region", &self.region)
            .field("endpoint", &self.endpoint)
            .field("key_id", &self.key_id)
            .field("key_secret", &redact(&self.key_secret))
            .field("session_token", &redact(&self.session_token))
            .finish()
    }
}

/// Command-line values that take precedence over every other layer.
///
/// Fields left as `None` (or `false` for the flags) are not serialized and
/// therefore leave lower layers untouched.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Overrides {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bucket: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prefix: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_delay: Option<f64>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub delete_missing: bool,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub dry_run: bool,
}

/// `trawl.toml` in the platform configuration directory.
pub fn default_config_file() -> Option<PathBuf> {
    ProjectDirs::from("", "", "trawl").map(|dirs| dirs.config_dir().join(CONFIG_FILE_NAME))
}

fn merge_file(figment: Figment, path: &Path) -> Figment {
    match path.extension().and_then(|ext| ext.to_str()).map(str::to_ascii_lowercase).as_deref() {
        Some("yaml" | "yml") => figment.merge(Yaml::file(path)),
        Some("json") => figment.merge(Json::file(path)),
        _ => figment.merge(Toml::file(path)),
    }
}

impl Config {
    /// The layered [`Figment`] without command-line overrides.
    ///
    /// An explicit `file` must exist; the default file is used only if it
    /// does.
    pub fn figment(file: Option<&Path>) -> Result<Figment> {
        let mut figment = Figment::from(Serialized::defaults(Config::default()));
        match file {
            Some(path) if !path.is_file() => exn::bail!(ErrorKind::MissingFile(path.to_path_buf())),
            Some(path) => figment = merge_file(figment, path),
            None => {
                if let Some(path) = default_config_file().filter(|path| path.is_file()) {
                    tracing::debug!(path = %path.display(), "Using default configuration file");
                    figment = merge_file(figment, &path);
                }
            },
        }
        Ok(figment.merge(Env::prefixed(ENV_PREFIX).split("__")))
    }

    /// Load, merge and validate the configuration.
    pub fn load(file: Option<&Path>, overrides: &Overrides) -> Result<Self> {
        let config: Config = Self::figment(file)?
            .merge(Serialized::defaults(overrides))
            .extract()
            .or_raise(|| ErrorKind::Load)?;
        config.validate()?;
        Ok(config)
    }

    /// Check values that deserialized fine but cannot work.
    pub fn validate(&self) -> Result<()> {
        if self.bucket.trim().is_empty() {
            exn::bail!(ErrorKind::Invalid("bucket"));
        }
        if !(self.base_url.starts_with("http://") || self.base_url.starts_with("https://")) {
            exn::bail!(ErrorKind::Invalid("base_url"));
        }
        if self.user_agent.trim().is_empty() {
            exn::bail!(ErrorKind::Invalid("user_agent"));
        }
        if !self.request_delay.is_finite() || self.request_delay < 0.0 {
            exn::bail!(ErrorKind::Invalid("request_delay"));
        }
        if self.s3.key_id.as_deref().is_none_or(str::is_empty) {
            exn::bail!(ErrorKind::Invalid("s3.key_id"));
        }
        if self.s3.key_secret.as_deref().is_none_or(str::is_empty) {
            exn::bail!(ErrorKind::Invalid("s3.key_secret"));
        }
        Ok(())
    }

    /// The pause between remote requests.
    pub fn request_delay(&self) -> Duration {
        Duration::from_secs_f64(self.request_delay)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use figment::Jail;
    use rstest::rstest;

    fn valid() -> Config {
        Config {
            bucket: "mirror-bucket".to_string(),
            s3: S3Config {
                key_id: Some("id".to_string()),
                key_secret: Some("secret".to_string()),
                ..S3Config::default()
            },
            ..Config::default()
        }
    }

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.prefix, "bls/pr");
        assert_eq!(config.base_url, DEFAULT_BASE_URL);
        assert_eq!(config.request_delay(), Duration::from_millis(500));
        assert!(!config.delete_missing);
        assert_eq!(config.s3.region, "us-east-1");
    }

    #[test]
    fn test_valid_config_passes() {
        valid().validate().unwrap();
    }

    #[rstest]
    #[case::missing_bucket(Config { bucket: " ".into(), ..valid() }, "bucket")]
    #[case::ftp_base(Config { base_url: "ftp://example.com/".into(), ..valid() }, "base_url")]
    #[case::empty_user_agent(Config { user_agent: String::new(), ..valid() }, "user_agent")]
    #[case::negative_delay(Config { request_delay: -1.0, ..valid() }, "request_delay")]
    #[case::infinite_delay(Config { request_delay: f64::INFINITY, ..valid() }, "request_delay")]
    #[case::missing_key(Config { s3: S3Config { key_id: None, ..valid().s3 }, ..valid() }, "s3.key_id")]
    #[case::missing_secret(Config { s3: S3Config { key_secret: Some(String::new()), ..valid().s3 }, ..valid() }, "s3.key_secret")]
    fn test_invalid(#[case] config: Config, #[case] field: &str) {
        let err = config.validate().unwrap_err();
        assert!(matches!(&*err, ErrorKind::Invalid(f) if *f == field));
    }

    #[test]
    fn test_layering() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "trawl.toml",
                r#"
                bucket = "from-file"
                prefix = "file/prefix"
                request_delay = 2.0

                [s3]
                key_id = "file-key"
                key_secret = "file-secret"
                endpoint = "https://s3.example.com"
                "#,
            )?;
            jail.set_env("TRAWL_PREFIX", "env/prefix");
            jail.set_env("TRAWL_S3__REGION", "eu-west-1");
            let overrides = Overrides {
                bucket: Some("from-cli".to_string()),
                delete_missing: true,
                ..Overrides::default()
            };
            let config = Config::load(Some(Path::new("trawl.toml")), &overrides).map_err(|e| e.to_string())?;
            assert_eq!(config.bucket, "from-cli");
            assert_eq!(config.prefix, "env/prefix");
            assert_eq!(config.request_delay, 2.0);
            assert!(config.delete_missing);
            assert_eq!(config.s3.region, "eu-west-1");
            assert_eq!(config.s3.endpoint.as_deref(), Some("https://s3.example.com"));
            assert_eq!(config.base_url, DEFAULT_BASE_URL);
            Ok(())
        });
    }

    #[test]
    fn test_yaml_file() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "trawl.yaml",
                "bucket: yaml-bucket\ndry_run: true\ns3:\n  key_id: k\n  key_secret: s\n",
            )?;
            let config = Config::load(Some(Path::new("trawl.yaml")), &Overrides::default()).map_err(|e| e.to_string())?;
            assert_eq!(config.bucket, "yaml-bucket");
            assert!(config.dry_run);
            Ok(())
        });
    }

    #[test]
    fn test_unset_flags_do_not_override() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "trawl.toml",
                "bucket = \"b\"\ndelete_missing = true\n[s3]\nkey_id = \"k\"\nkey_secret = \"s\"\n",
            )?;
            let config = Config::load(Some(Path::new("trawl.toml")), &Overrides::default()).map_err(|e| e.to_string())?;
            assert!(config.delete_missing);
            Ok(())
        });
    }

    #[test]
    fn test_explicit_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nope.toml");
        let err = Config::load(Some(&path), &Overrides::default()).unwrap_err();
        assert!(matches!(&*err, ErrorKind::MissingFile(p) if *p == path));
    }

    #[test]
    fn test_secrets_redacted_in_debug() {
        let rendered = format!("{:?}", valid());
        assert!(!rendered.contains("secret\""));
        assert!(rendered.contains("<redacted>"));
    }
}
