// Configuration loading and parsing (keystone.toml, credentials.toml, env overrides).

use serde::Deserialize;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{info, warn};

/// Secret used when neither credentials.toml nor the environment provides one.
/// Accepted only so a fresh checkout can boot; `load_config` warns about it.
pub const INSECURE_DEV_SECRET: &str = "keystone-insecure-development-key-change-this";

const SUPPORTED_ALGORITHMS: &[&str] = &["HS256", "HS384", "HS512"];

const CONFIG_DIR: &str = "config";
const DEFAULTS_DIR: &str = "defaults";
const MAIN_FILE: &str = "keystone.toml";
const CREDENTIALS_FILE: &str = "credentials.toml";

/// Upper bounds for token lifetimes; past these the expiry arithmetic
/// stops being meaningful.
const MAX_ACCESS_TOKEN_HOURS: u32 = 24 * 366;
const MAX_REFRESH_TOKEN_DAYS: u32 = 3660;
const MAX_RESET_TOKEN_HOURS: u32 = 24 * 31;

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config file not found: {path}")]
    FileNotFound { path: PathBuf },

    #[error("failed to parse config file {path}: {source}")]
    ParseError {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("validation error for field `{field}`: {message}")]
    ValidationError { field: String, message: String },

    #[error("failed to initialize config from defaults: {message}")]
    DefaultsCopyError { message: String },
}

// ---------------------------------------------------------------------------
// Top-level assembled Config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub jwt: JwtConfig,
    pub logging: LoggingConfig,
    pub app: AppConfig,
    pub credentials: CredentialsConfig,
}

// ---------------------------------------------------------------------------
// keystone.toml structs
// ---------------------------------------------------------------------------

/// Raw deserialization target for the entire keystone.toml file.
#[derive(Debug, Clone, Deserialize)]
struct KeystoneFile {
    server: ServerConfig,
    database: DatabaseConfig,
    jwt: JwtConfig,
    #[serde(default)]
    logging: LoggingConfig,
    app: AppConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Origins allowed by the CORS layer. Empty means same-origin only.
    #[serde(default)]
    pub allowed_origins: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// SQLite file path, or `":memory:"`.
    pub path: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct JwtConfig {
    pub algorithm: String,
    pub access_token_hours: u32,
    pub refresh_token_days: u32,
    pub reset_token_hours: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// `EnvFilter` directive used when `RUST_LOG` is not set.
    pub level: String,
    /// Directory for `keystone.log`. Stdout only when absent.
    #[serde(default)]
    pub dir: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "keystone=info,tower_http=info,warn".to_string(),
            dir: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// Test mode relaxes secret-key validation.
    #[serde(default)]
    pub testing: bool,
    pub static_dir: String,
    /// Used to build links in outgoing mail (password reset).
    pub public_base_url: String,
    pub default_from_email: String,
    pub page_size: u32,
    pub max_page_size: u32,
}

// ---------------------------------------------------------------------------
// credentials.toml structs
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize, Default)]
pub struct CredentialsConfig {
    pub secret_key: Option<String>,
    /// Falls back to `secret_key` when omitted.
    pub jwt_secret_key: Option<String>,
}

impl Config {
    /// The key used to sign and verify JWTs.
    pub fn jwt_secret(&self) -> &str {
        self.credentials
            .jwt_secret_key
            .as_deref()
            .or(self.credentials.secret_key.as_deref())
            .unwrap_or(INSECURE_DEV_SECRET)
    }

    /// Access token lifetime in seconds, as reported in `expires_in`.
    pub fn access_token_seconds(&self) -> i64 {
        i64::from(self.jwt.access_token_hours) * 3600
    }

    /// Inline configuration for tests: in-memory database, test mode on,
    /// fixed secret. No files are read.
    pub fn for_tests() -> Self {
        Self {
            server: ServerConfig {
                host: "127.0.0.1".into(),
                port: 8000,
                allowed_origins: vec!["http://localhost:3000".into()],
            },
            database: DatabaseConfig {
                path: ":memory:".into(),
            },
            jwt: JwtConfig {
                algorithm: "HS256".into(),
                access_token_hours: 24,
                refresh_token_days: 7,
                reset_token_hours: 12,
            },
            logging: LoggingConfig::default(),
            app: AppConfig {
                testing: true,
                static_dir: "static".into(),
                public_base_url: "http://testserver".into(),
                default_from_email: "noreply@keystone.local".into(),
                page_size: 20,
                max_page_size: 100,
            },
            credentials: CredentialsConfig {
                secret_key: Some("test-secret-key-that-is-long-enough-0123".into()),
                jwt_secret_key: None,
            },
        }
    }
}

// ---------------------------------------------------------------------------
// Loading logic
// ---------------------------------------------------------------------------

/// Load and validate configuration from `config/keystone.toml` and
/// (optionally) `config/credentials.toml`, both relative to `base_dir`.
///
/// Environment overrides are NOT applied here; `load_config()` does that.
pub fn load_config_from(base_dir: &Path) -> Result<Config, ConfigError> {
    let config_dir = base_dir.join(CONFIG_DIR);

    let main_path = config_dir.join(MAIN_FILE);
    let main_text = read_file(&main_path)?;
    let file: KeystoneFile = toml::from_str(&main_text).map_err(|e| ConfigError::ParseError {
        path: main_path.clone(),
        source: e,
    })?;

    let credentials_path = config_dir.join(CREDENTIALS_FILE);
    let credentials = if credentials_path.exists() {
        let cred_text = read_file(&credentials_path)?;
        toml::from_str(&cred_text).map_err(|e| ConfigError::ParseError {
            path: credentials_path.clone(),
            source: e,
        })?
    } else {
        CredentialsConfig::default()
    };

    let config = Config {
        server: file.server,
        database: file.database,
        jwt: file.jwt,
        logging: file.logging,
        app: file.app,
        credentials,
    };

    validate(&config)?;

    Ok(config)
}

/// Apply environment overrides using the variable names the service has
/// always honoured (`SECRET_KEY`, `JWT_EXPIRATION_HOURS`, ...).
///
/// `lookup` abstracts `std::env::var` so tests can inject values.
pub fn apply_env_overrides<F>(config: &mut Config, lookup: F) -> Result<(), ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(v) = lookup("SECRET_KEY") {
        config.credentials.secret_key = Some(v);
    }
    if let Some(v) = lookup("JWT_SECRET_KEY") {
        config.credentials.jwt_secret_key = Some(v);
    }
    if let Some(v) = lookup("JWT_EXPIRATION_HOURS") {
        config.jwt.access_token_hours = parse_env("JWT_EXPIRATION_HOURS", &v)?;
    }
    if let Some(v) = lookup("JWT_REFRESH_EXPIRATION_DAYS") {
        config.jwt.refresh_token_days = parse_env("JWT_REFRESH_EXPIRATION_DAYS", &v)?;
    }
    if let Some(v) = lookup("DATABASE_PATH") {
        config.database.path = v;
    }
    if let Some(v) = lookup("KEYSTONE_PORT") {
        config.server.port = parse_env("KEYSTONE_PORT", &v)?;
    }
    if let Some(v) = lookup("CORS_ALLOWED_ORIGINS") {
        config.server.allowed_origins = v
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(String::from)
            .collect();
    }
    if let Some(v) = lookup("TESTING") {
        config.app.testing = parse_bool("TESTING", &v)?;
    }
    Ok(())
}

/// Result of seeding `config/` on first run.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct SeedReport {
    /// Files copied from `defaults/` into `config/`, by name.
    pub seeded: Vec<String>,
    /// No `config/credentials.toml` exists; secrets come from the
    /// environment or fall back to the development key.
    pub credentials_missing: bool,
}

/// Copy `keystone.toml` from `defaults/` into `config/` unless it is already
/// there. `credentials.toml` is never written: operators create it from
/// `defaults/credentials.toml.example`.
pub fn ensure_config_files(base_dir: &Path) -> Result<SeedReport, ConfigError> {
    let defaults_dir = base_dir.join(DEFAULTS_DIR);
    let config_dir = base_dir.join(CONFIG_DIR);
    let mut report = SeedReport {
        credentials_missing: !config_dir.join(CREDENTIALS_FILE).exists(),
        ..SeedReport::default()
    };

    let target = config_dir.join(MAIN_FILE);
    if target.exists() {
        return Ok(report);
    }
    let source = defaults_dir.join(MAIN_FILE);
    if !source.exists() {
        return Err(ConfigError::DefaultsCopyError {
            message: format!(
                "{} is missing and there is no {} to seed it from; run from the project root",
                target.display(),
                source.display()
            ),
        });
    }

    std::fs::create_dir_all(&config_dir).map_err(|e| ConfigError::DefaultsCopyError {
        message: format!("failed to create {}: {e}", config_dir.display()),
    })?;
    std::fs::copy(&source, &target).map_err(|e| ConfigError::DefaultsCopyError {
        message: format!("failed to copy {} to {}: {e}", source.display(), target.display()),
    })?;
    info!("Seeded {} from {}", target.display(), source.display());
    report.seeded.push(MAIN_FILE.to_string());

    Ok(report)
}

/// Convenience wrapper: copies defaults, loads config relative to the current
/// working directory, then applies environment overrides and re-validates.
pub fn load_config() -> Result<Config, ConfigError> {
    let cwd = std::env::current_dir().map_err(|_| ConfigError::FileNotFound {
        path: PathBuf::from("."),
    })?;
    let report = ensure_config_files(&cwd)?;
    if report.credentials_missing {
        info!(
            "No {CONFIG_DIR}/{CREDENTIALS_FILE}; copy {DEFAULTS_DIR}/{CREDENTIALS_FILE}.example to set secrets"
        );
    }
    let mut config = load_config_from(&cwd)?;
    apply_env_overrides(&mut config, |key| std::env::var(key).ok())?;
    validate(&config)?;

    if config.jwt_secret() == INSECURE_DEV_SECRET {
        warn!("No SECRET_KEY configured; using the insecure development key");
    }

    Ok(config)
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn read_file(path: &Path) -> Result<String, ConfigError> {
    std::fs::read_to_string(path).map_err(|_| ConfigError::FileNotFound {
        path: path.to_path_buf(),
    })
}

fn parse_env<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|e: T::Err| ConfigError::ValidationError {
            field: key.to_string(),
            message: format!("invalid value `{value}`: {e}"),
        })
}

fn parse_bool(key: &str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        other => Err(ConfigError::ValidationError {
            field: key.to_string(),
            message: format!("expected a boolean, got `{other}`"),
        }),
    }
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

pub fn validate(config: &Config) -> Result<(), ConfigError> {
    if config.server.port == 0 {
        return Err(ConfigError::ValidationError {
            field: "server.port".into(),
            message: "must be greater than 0".into(),
        });
    }

    if config
        .server
        .allowed_origins
        .iter()
        .any(|origin| origin.trim() == "*")
    {
        return Err(ConfigError::ValidationError {
            field: "server.allowed_origins".into(),
            message: "`*` cannot be combined with credentialed requests; list each origin".into(),
        });
    }

    if config.database.path.trim().is_empty() {
        return Err(ConfigError::ValidationError {
            field: "database.path".into(),
            message: "must not be empty".into(),
        });
    }

    let jwt = &config.jwt;
    if !SUPPORTED_ALGORITHMS.contains(&jwt.algorithm.as_str()) {
        return Err(ConfigError::ValidationError {
            field: "jwt.algorithm".into(),
            message: format!(
                "expected one of {}, got `{}`",
                SUPPORTED_ALGORITHMS.join("|"),
                jwt.algorithm
            ),
        });
    }
    let lifetimes: &[(&str, u32, u32)] = &[
        ("jwt.access_token_hours", jwt.access_token_hours, MAX_ACCESS_TOKEN_HOURS),
        ("jwt.refresh_token_days", jwt.refresh_token_days, MAX_REFRESH_TOKEN_DAYS),
        ("jwt.reset_token_hours", jwt.reset_token_hours, MAX_RESET_TOKEN_HOURS),
    ];
    for (name, val, max) in lifetimes {
        if *val == 0 || val > max {
            return Err(ConfigError::ValidationError {
                field: name.to_string(),
                message: format!("must be between 1 and {max}, got {val}"),
            });
        }
    }

    let app = &config.app;
    if app.page_size == 0 || app.max_page_size == 0 {
        return Err(ConfigError::ValidationError {
            field: "app.page_size".into(),
            message: "page sizes must be > 0".into(),
        });
    }
    if app.page_size > app.max_page_size {
        return Err(ConfigError::ValidationError {
            field: "app.page_size".into(),
            message: format!(
                "must not exceed app.max_page_size ({}), got {}",
                app.max_page_size, app.page_size
            ),
        });
    }

    if !app.testing && config.jwt_secret().len() < 32 {
        return Err(ConfigError::ValidationError {
            field: "credentials.secret_key".into(),
            message: "must be at least 32 bytes outside test mode".into(),
        });
    }

    Ok(())
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::fs;

    /// Helper: locate the workspace root holding `defaults/keystone.toml`
    /// (cargo runs tests from the crate directory).
    fn project_root() -> PathBuf {
        let cwd = std::env::current_dir().unwrap();
        cwd.ancestors()
            .find(|dir| dir.join("defaults/keystone.toml").exists())
            .map(Path::to_path_buf)
            .unwrap_or_else(|| panic!("Cannot locate defaults/ directory from CWD {:?}", cwd))
    }

    /// Helper: a scratch dir with config/keystone.toml copied from defaults.
    fn scratch_dir(name: &str) -> PathBuf {
        let tmp = std::env::temp_dir().join(format!("keystone_{name}_{}", std::process::id()));
        let _ = fs::remove_dir_all(&tmp);
        fs::create_dir_all(tmp.join("config")).unwrap();
        fs::copy(
            project_root().join("defaults/keystone.toml"),
            tmp.join("config/keystone.toml"),
        )
        .unwrap();
        tmp
    }

    #[test]
    fn load_valid_config_from_defaults() {
        let tmp = scratch_dir("defaults");
        let config = load_config_from(&tmp).expect("defaults should load");

        assert_eq!(config.server.port, 8000);
        assert_eq!(config.database.path, "keystone.db");
        assert_eq!(config.jwt.algorithm, "HS256");
        assert_eq!(config.jwt.access_token_hours, 24);
        assert_eq!(config.jwt.refresh_token_days, 7);
        assert_eq!(config.jwt.reset_token_hours, 12);
        assert_eq!(config.app.page_size, 20);
        assert!(config.credentials.secret_key.is_none());
        assert_eq!(config.jwt_secret(), INSECURE_DEV_SECRET);

        let _ = fs::remove_dir_all(&tmp);
    }

    #[test]
    fn credentials_toml_supplies_secrets() {
        let tmp = scratch_dir("creds");
        fs::write(
            tmp.join("config/credentials.toml"),
            "secret_key = \"0123456789abcdef0123456789abcdef\"\njwt_secret_key = \"jwt-only-secret-0123456789abcdef0\"\n",
        )
        .unwrap();

        let config = load_config_from(&tmp).expect("should load with credentials.toml");
        assert_eq!(config.jwt_secret(), "jwt-only-secret-0123456789abcdef0");

        let _ = fs::remove_dir_all(&tmp);
    }

    #[test]
    fn missing_main_file_is_reported() {
        let tmp = std::env::temp_dir().join(format!("keystone_missing_{}", std::process::id()));
        let _ = fs::remove_dir_all(&tmp);
        fs::create_dir_all(&tmp).unwrap();

        let err = load_config_from(&tmp).unwrap_err();
        assert!(matches!(err, ConfigError::FileNotFound { .. }));

        let _ = fs::remove_dir_all(&tmp);
    }

    #[test]
    fn ensure_config_files_seeds_keystone_toml_once() {
        let tmp = std::env::temp_dir().join(format!("keystone_ensure_{}", std::process::id()));
        let _ = fs::remove_dir_all(&tmp);
        fs::create_dir_all(tmp.join("defaults")).unwrap();
        fs::copy(
            project_root().join("defaults/keystone.toml"),
            tmp.join("defaults/keystone.toml"),
        )
        .unwrap();
        fs::write(tmp.join("defaults/credentials.toml.example"), "secret_key = \"x\"\n").unwrap();

        let first = ensure_config_files(&tmp).unwrap();
        assert_eq!(first.seeded, vec!["keystone.toml".to_string()]);
        assert!(first.credentials_missing);
        assert!(tmp.join("config/keystone.toml").exists());
        assert!(!tmp.join("config/credentials.toml").exists());
        assert!(!tmp.join("config/credentials.toml.example").exists());

        fs::write(tmp.join("config/credentials.toml"), "secret_key = \"x\"\n").unwrap();
        let second = ensure_config_files(&tmp).unwrap();
        assert_eq!(second, SeedReport::default());

        let _ = fs::remove_dir_all(&tmp);
    }

    #[test]
    fn ensure_config_files_without_defaults_or_config_fails() {
        let tmp = std::env::temp_dir().join(format!("keystone_nodefaults_{}", std::process::id()));
        let _ = fs::remove_dir_all(&tmp);
        fs::create_dir_all(&tmp).unwrap();

        let err = ensure_config_files(&tmp).unwrap_err();
        assert!(matches!(err, ConfigError::DefaultsCopyError { .. }));

        let _ = fs::remove_dir_all(&tmp);
    }

    #[test]
    fn env_overrides_replace_file_values() {
        let mut config = Config::for_tests();
        let env: HashMap<&str, &str> = [
            ("JWT_EXPIRATION_HOURS", "2"),
            ("KEYSTONE_PORT", "9100"),
            ("CORS_ALLOWED_ORIGINS", "https://a.example, https://b.example,"),
            ("TESTING", "false"),
        ]
        .into_iter()
        .collect();

        apply_env_overrides(&mut config, |k| env.get(k).map(|v| v.to_string())).unwrap();

        assert_eq!(config.jwt.access_token_hours, 2);
        assert_eq!(config.access_token_seconds(), 7200);
        assert_eq!(config.server.port, 9100);
        assert_eq!(
            config.server.allowed_origins,
            vec!["https://a.example", "https://b.example"]
        );
        assert!(!config.app.testing);
    }

    #[test]
    fn env_override_with_garbage_number_is_rejected() {
        let mut config = Config::for_tests();
        let err = apply_env_overrides(&mut config, |k| {
            (k == "KEYSTONE_PORT").then(|| "eighty".to_string())
        })
        .unwrap_err();
        assert!(matches!(err, ConfigError::ValidationError { ref field, .. } if field == "KEYSTONE_PORT"));
    }

    #[test]
    fn rejects_unknown_algorithm() {
        let mut config = Config::for_tests();
        config.jwt.algorithm = "RS256".into();
        let err = validate(&config).unwrap_err();
        assert!(err.to_string().contains("jwt.algorithm"));
    }

    #[test]
    fn rejects_page_size_above_max() {
        let mut config = Config::for_tests();
        config.app.page_size = 500;
        assert!(validate(&config).is_err());
    }

    #[test]
    fn short_secret_only_allowed_in_test_mode() {
        let mut config = Config::for_tests();
        config.credentials.secret_key = Some("short".into());
        assert!(validate(&config).is_ok());

        config.app.testing = false;
        let err = validate(&config).unwrap_err();
        assert!(err.to_string().contains("credentials.secret_key"));
    }

    #[test]
    fn rejects_wildcard_cors_origin() {
        let mut config = Config::for_tests();
        config.server.allowed_origins = vec!["https://a.example".into(), "*".into()];
        let err = validate(&config).unwrap_err();
        assert!(
            matches!(err, ConfigError::ValidationError { ref field, .. } if field == "server.allowed_origins")
        );
    }

    #[test]
    fn rejects_token_lifetimes_past_their_bounds() {
        let mut config = Config::for_tests();
        config.jwt.refresh_token_days = u32::MAX;
        let err = validate(&config).unwrap_err();
        assert!(err.to_string().contains("jwt.refresh_token_days"));

        let mut config = Config::for_tests();
        config.jwt.access_token_hours = 0;
        assert!(validate(&config).is_err());

        let mut config = Config::for_tests();
        config.jwt.reset_token_hours = MAX_RESET_TOKEN_HOURS + 1;
        assert!(validate(&config).is_err());
        config.jwt.reset_token_hours = MAX_RESET_TOKEN_HOURS;
        assert!(validate(&config).is_ok());
    }
}
