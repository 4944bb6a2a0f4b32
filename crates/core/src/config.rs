use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::conversation::validate::parse_country_code;
use crate::domain::lead::Locale;

/// One year; longer retention would let the prune cutoff underflow the clock.
pub const MAX_PHOTO_SESSION_TTL_HOURS: u64 = 8760;

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub telegram: TelegramConfig,
    pub intake: IntakeConfig,
    pub runtime: RuntimeConfig,
    pub logging: LoggingConfig,
}

#[derive(Clone, Debug)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub timeout_secs: u64,
}

#[derive(Clone, Debug)]
pub struct TelegramConfig {
    pub bot_token: SecretString,
    /// The single operator identity; every admin and negotiation control is gated on it.
    pub operator_id: i64,
    pub operator_locale: Locale,
    pub poll_timeout_secs: u64,
    /// Public `@name` of the bot without the `@`; feeds the share link.
    pub bot_username: Option<String>,
}

#[derive(Clone, Debug)]
pub struct IntakeConfig {
    pub max_photos: usize,
    pub min_photos: usize,
    pub dedup_window_secs: u64,
    pub default_locale: Locale,
    pub default_country_code: String,
    pub ask_completeness: bool,
    pub photo_session_ttl_hours: u64,
}

#[derive(Clone, Debug)]
pub struct RuntimeConfig {
    /// A per-user lane with no traffic for this long is torn down.
    pub lane_idle_secs: u64,
    pub prune_interval_secs: u64,
}

#[derive(Clone, Debug)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Compact,
    Pretty,
    Json,
}

#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    pub database_url: Option<String>,
    pub log_level: Option<String>,
    pub bot_token: Option<String>,
    pub operator_id: Option<i64>,
    pub max_photos: Option<usize>,
    pub dedup_window_secs: Option<u64>,
}

#[derive(Clone, Debug, Default)]
pub struct LoadOptions {
    pub config_path: Option<PathBuf>,
    pub require_file: bool,
    pub overrides: ConfigOverrides,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config file `{path}`: {source}")]
    ReadFile { path: PathBuf, source: std::io::Error },
    #[error("could not parse config file `{path}`: {source}")]
    ParseFile { path: PathBuf, source: toml::de::Error },
    #[error("required config file was not found: `{0}`")]
    MissingConfigFile(PathBuf),
    #[error("environment variable interpolation failed for `{var}`")]
    MissingEnvInterpolation { var: String },
    #[error("unterminated environment interpolation expression")]
    UnterminatedInterpolation,
    #[error("invalid environment override for `{key}`: `{value}`")]
    InvalidEnvOverride { key: String, value: String },
    #[error("configuration validation failed: {0}")]
    Validation(String),
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig {
                url: "sqlite://romupunkt.db".to_string(),
                max_connections: 5,
                timeout_secs: 30,
            },
            telegram: TelegramConfig {
                bot_token: String::new().into(),
                operator_id: 0,
                operator_locale: Locale::Ee,
                poll_timeout_secs: 30,
                bot_username: None,
            },
            intake: IntakeConfig {
                max_photos: 4,
                min_photos: 1,
                dedup_window_secs: 120,
                default_locale: Locale::En,
                default_country_code: "+372".to_string(),
                ask_completeness: false,
                photo_session_ttl_hours: 72,
            },
            runtime: RuntimeConfig { lane_idle_secs: 300, prune_interval_secs: 3600 },
            logging: LoggingConfig { level: "info".to_string(), format: LogFormat::Compact },
        }
    }
}

impl std::str::FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "compact" => Ok(Self::Compact),
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(ConfigError::Validation(format!(
                "unsupported log format `{other}` (expected compact|pretty|json)"
            ))),
        }
    }
}

impl AppConfig {
    pub fn load(options: LoadOptions) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(path) = resolve_config_path(options.config_path.as_deref()) {
            let patch = read_patch(&path)?;
            config.apply_patch(patch)?;
        } else if options.require_file {
            let expected = options.config_path.unwrap_or_else(|| PathBuf::from("romupunkt.toml"));
            return Err(ConfigError::MissingConfigFile(expected));
        }

        config.apply_env_overrides()?;
        config.apply_overrides(options.overrides);
        config.validate()?;

        Ok(config)
    }

    fn apply_patch(&mut self, patch: ConfigPatch) -> Result<(), ConfigError> {
        if let Some(database) = patch.database {
            if let Some(url) = database.url {
                self.database.url = url;
            }
            if let Some(max_connections) = database.max_connections {
                self.database.max_connections = max_connections;
            }
            if let Some(timeout_secs) = database.timeout_secs {
                self.database.timeout_secs = timeout_secs;
            }
        }

        if let Some(telegram) = patch.telegram {
            if let Some(bot_token) = telegram.bot_token {
                self.telegram.bot_token = bot_token.into();
            }
            if let Some(operator_id) = telegram.operator_id {
                self.telegram.operator_id = operator_id;
            }
            if let Some(operator_locale) = telegram.operator_locale {
                self.telegram.operator_locale =
                    parse_locale("telegram.operator_locale", &operator_locale)?;
            }
            if let Some(poll_timeout_secs) = telegram.poll_timeout_secs {
                self.telegram.poll_timeout_secs = poll_timeout_secs;
            }
            if let Some(bot_username) = telegram.bot_username {
                self.telegram.bot_username = normalize_username(&bot_username);
            }
        }

        if let Some(intake) = patch.intake {
            if let Some(max_photos) = intake.max_photos {
                self.intake.max_photos = max_photos;
            }
            if let Some(min_photos) = intake.min_photos {
                self.intake.min_photos = min_photos;
            }
            if let Some(dedup_window_secs) = intake.dedup_window_secs {
                self.intake.dedup_window_secs = dedup_window_secs;
            }
            if let Some(default_locale) = intake.default_locale {
                self.intake.default_locale =
                    parse_locale("intake.default_locale", &default_locale)?;
            }
            if let Some(default_country_code) = intake.default_country_code {
                self.intake.default_country_code = default_country_code;
            }
            if let Some(ask_completeness) = intake.ask_completeness {
                self.intake.ask_completeness = ask_completeness;
            }
            if let Some(ttl) = intake.photo_session_ttl_hours {
                self.intake.photo_session_ttl_hours = ttl;
            }
        }

        if let Some(runtime) = patch.runtime {
            if let Some(lane_idle_secs) = runtime.lane_idle_secs {
                self.runtime.lane_idle_secs = lane_idle_secs;
            }
            if let Some(prune_interval_secs) = runtime.prune_interval_secs {
                self.runtime.prune_interval_secs = prune_interval_secs;
            }
        }

        if let Some(logging) = patch.logging {
            if let Some(level) = logging.level {
                self.logging.level = level;
            }
            if let Some(format) = logging.format {
                self.logging.format = format;
            }
        }

        Ok(())
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Some(value) = read_env("ROMUPUNKT_DATABASE_URL") {
            self.database.url = value;
        }
        if let Some(value) = read_env("ROMUPUNKT_DATABASE_MAX_CONNECTIONS") {
            self.database.max_connections =
                parse_env("ROMUPUNKT_DATABASE_MAX_CONNECTIONS", &value)?;
        }
        if let Some(value) = read_env("ROMUPUNKT_DATABASE_TIMEOUT_SECS") {
            self.database.timeout_secs = parse_env("ROMUPUNKT_DATABASE_TIMEOUT_SECS", &value)?;
        }

        if let Some(value) = read_env("ROMUPUNKT_TELEGRAM_BOT_TOKEN") {
            self.telegram.bot_token = value.into();
        }
        if let Some(value) = read_env("ROMUPUNKT_TELEGRAM_OPERATOR_ID") {
            self.telegram.operator_id = parse_env("ROMUPUNKT_TELEGRAM_OPERATOR_ID", &value)?;
        }
        if let Some(value) = read_env("ROMUPUNKT_TELEGRAM_OPERATOR_LOCALE") {
            self.telegram.operator_locale =
                parse_env("ROMUPUNKT_TELEGRAM_OPERATOR_LOCALE", &value)?;
        }
        if let Some(value) = read_env("ROMUPUNKT_TELEGRAM_BOT_USERNAME") {
            self.telegram.bot_username = normalize_username(&value);
        }

        if let Some(value) = read_env("ROMUPUNKT_INTAKE_MAX_PHOTOS") {
            self.intake.max_photos = parse_env("ROMUPUNKT_INTAKE_MAX_PHOTOS", &value)?;
        }
        if let Some(value) = read_env("ROMUPUNKT_INTAKE_MIN_PHOTOS") {
            self.intake.min_photos = parse_env("ROMUPUNKT_INTAKE_MIN_PHOTOS", &value)?;
        }
        if let Some(value) = read_env("ROMUPUNKT_INTAKE_DEDUP_WINDOW_SECS") {
            self.intake.dedup_window_secs =
                parse_env("ROMUPUNKT_INTAKE_DEDUP_WINDOW_SECS", &value)?;
        }
        if let Some(value) = read_env("ROMUPUNKT_INTAKE_ASK_COMPLETENESS") {
            self.intake.ask_completeness = parse_env("ROMUPUNKT_INTAKE_ASK_COMPLETENESS", &value)?;
        }

        let log_level =
            read_env("ROMUPUNKT_LOGGING_LEVEL").or_else(|| read_env("ROMUPUNKT_LOG_LEVEL"));
        if let Some(value) = log_level {
            self.logging.level = value;
        }
        let log_format =
            read_env("ROMUPUNKT_LOGGING_FORMAT").or_else(|| read_env("ROMUPUNKT_LOG_FORMAT"));
        if let Some(value) = log_format {
            self.logging.format = value.parse()?;
        }

        Ok(())
    }

    fn apply_overrides(&mut self, overrides: ConfigOverrides) {
        if let Some(database_url) = overrides.database_url {
            self.database.url = database_url;
        }
        if let Some(log_level) = overrides.log_level {
            self.logging.level = log_level;
        }
        if let Some(bot_token) = overrides.bot_token {
            self.telegram.bot_token = bot_token.into();
        }
        if let Some(operator_id) = overrides.operator_id {
            self.telegram.operator_id = operator_id;
        }
        if let Some(max_photos) = overrides.max_photos {
            self.intake.max_photos = max_photos;
        }
        if let Some(dedup_window_secs) = overrides.dedup_window_secs {
            self.intake.dedup_window_secs = dedup_window_secs;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_database(&self.database)?;
        validate_telegram(&self.telegram)?;
        validate_intake(&self.intake)?;
        validate_runtime(&self.runtime)?;
        validate_logging(&self.logging)?;
        Ok(())
    }
}

fn resolve_config_path(explicit_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit_path {
        return path.exists().then_some(path.to_path_buf());
    }

    [PathBuf::from("romupunkt.toml"), PathBuf::from("config/romupunkt.toml")]
        .into_iter()
        .find(|path| path.exists())
}

fn read_patch(path: &Path) -> Result<ConfigPatch, ConfigError> {
    let raw = fs::read_to_string(path)
        .map_err(|source| ConfigError::ReadFile { path: path.to_path_buf(), source })?;

    let interpolated = interpolate_env_vars(&raw)?;
    toml::from_str::<ConfigPatch>(&interpolated)
        .map_err(|source| ConfigError::ParseFile { path: path.to_path_buf(), source })
}

fn interpolate_env_vars(input: &str) -> Result<String, ConfigError> {
    let mut output = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch != '$' || chars.peek() != Some(&'{') {
            output.push(ch);
            continue;
        }

        chars.next();
        let mut key = String::new();
        loop {
            match chars.next() {
                Some('}') => break,
                Some(next) => key.push(next),
                None => return Err(ConfigError::UnterminatedInterpolation),
            }
        }

        let value =
            env::var(&key).map_err(|_| ConfigError::MissingEnvInterpolation { var: key.clone() })?;
        output.push_str(&value);
    }

    Ok(output)
}

fn validate_database(database: &DatabaseConfig) -> Result<(), ConfigError> {
    let url = database.url.trim();
    let sqlite_url =
        url.starts_with("sqlite://") || url.starts_with("sqlite::") || url == ":memory:";
    if !sqlite_url {
        return Err(ConfigError::Validation(
            "database.url must be a sqlite URL (`sqlite://...`, `sqlite::...`, or `:memory:`)"
                .to_string(),
        ));
    }

    if database.max_connections == 0 {
        return Err(ConfigError::Validation(
            "database.max_connections must be greater than zero".to_string(),
        ));
    }

    if database.timeout_secs == 0 || database.timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "database.timeout_secs must be in range 1..=300".to_string(),
        ));
    }

    Ok(())
}

fn validate_telegram(telegram: &TelegramConfig) -> Result<(), ConfigError> {
    let bot_token = telegram.bot_token.expose_secret();
    if bot_token.trim().is_empty() {
        return Err(ConfigError::Validation(
            "telegram.bot_token is required. Ask @BotFather for one".to_string(),
        ));
    }
    if !bot_token.contains(':') {
        return Err(ConfigError::Validation(
            "telegram.bot_token must look like `<bot id>:<secret>`".to_string(),
        ));
    }

    if telegram.operator_id <= 0 {
        return Err(ConfigError::Validation(
            "telegram.operator_id must be the operator's positive Telegram user id".to_string(),
        ));
    }

    if telegram.poll_timeout_secs == 0 || telegram.poll_timeout_secs > 60 {
        return Err(ConfigError::Validation(
            "telegram.poll_timeout_secs must be in range 1..=60".to_string(),
        ));
    }

    if let Some(username) = &telegram.bot_username {
        if !username.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
            return Err(ConfigError::Validation(
                "telegram.bot_username may only contain letters, digits and `_`".to_string(),
            ));
        }
    }

    Ok(())
}

fn validate_intake(intake: &IntakeConfig) -> Result<(), ConfigError> {
    if !(1..=10).contains(&intake.max_photos) {
        return Err(ConfigError::Validation(
            "intake.max_photos must be in range 1..=10".to_string(),
        ));
    }

    if intake.min_photos > intake.max_photos {
        return Err(ConfigError::Validation(format!(
            "intake.min_photos ({}) must not exceed intake.max_photos ({})",
            intake.min_photos, intake.max_photos
        )));
    }

    if !(1..=3600).contains(&intake.dedup_window_secs) {
        return Err(ConfigError::Validation(
            "intake.dedup_window_secs must be in range 1..=3600".to_string(),
        ));
    }

    if parse_country_code(&intake.default_country_code).as_deref()
        != Some(intake.default_country_code.as_str())
    {
        return Err(ConfigError::Validation(
            "intake.default_country_code must look like `+372`".to_string(),
        ));
    }

    if !(1..=MAX_PHOTO_SESSION_TTL_HOURS).contains(&intake.photo_session_ttl_hours) {
        return Err(ConfigError::Validation(format!(
            "intake.photo_session_ttl_hours must be in range 1..={MAX_PHOTO_SESSION_TTL_HOURS}"
        )));
    }

    Ok(())
}

fn validate_runtime(runtime: &RuntimeConfig) -> Result<(), ConfigError> {
    if runtime.lane_idle_secs == 0 || runtime.prune_interval_secs == 0 {
        return Err(ConfigError::Validation(
            "runtime.lane_idle_secs and runtime.prune_interval_secs must be greater than zero"
                .to_string(),
        ));
    }

    Ok(())
}

fn validate_logging(logging: &LoggingConfig) -> Result<(), ConfigError> {
    let level = logging.level.trim().to_ascii_lowercase();
    match level.as_str() {
        "trace" | "debug" | "info" | "warn" | "error" => Ok(()),
        _ => Err(ConfigError::Validation(
            "logging.level must be one of trace|debug|info|warn|error".to_string(),
        )),
    }
}

fn read_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn parse_env<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse::<T>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn normalize_username(value: &str) -> Option<String> {
    let name = value.trim().trim_start_matches('@');
    (!name.is_empty()).then(|| name.to_string())
}

fn parse_locale(key: &str, value: &str) -> Result<Locale, ConfigError> {
    value.parse::<Locale>().map_err(|reason| ConfigError::Validation(format!("{key}: {reason}")))
}

#[derive(Debug, Default, Deserialize)]
struct ConfigPatch {
    database: Option<DatabasePatch>,
    telegram: Option<TelegramPatch>,
    intake: Option<IntakePatch>,
    runtime: Option<RuntimePatch>,
    logging: Option<LoggingPatch>,
}

#[derive(Debug, Default, Deserialize)]
struct DatabasePatch {
    url: Option<String>,
    max_connections: Option<u32>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct TelegramPatch {
    bot_token: Option<String>,
    operator_id: Option<i64>,
    operator_locale: Option<String>,
    poll_timeout_secs: Option<u64>,
    bot_username: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct IntakePatch {
    max_photos: Option<usize>,
    min_photos: Option<usize>,
    dedup_window_secs: Option<u64>,
    default_locale: Option<String>,
    default_country_code: Option<String>,
    ask_completeness: Option<bool>,
    photo_session_ttl_hours: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct RuntimePatch {
    lane_idle_secs: Option<u64>,
    prune_interval_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct LoggingPatch {
    level: Option<String>,
    format: Option<LogFormat>,
}

#[cfg(test)]
mod tests {
    use std::env;
    use std::fs;
    use std::io;
    use std::sync::{Mutex, OnceLock};

    use secrecy::ExposeSecret;
    use tempfile::TempDir;

    use super::{AppConfig, ConfigError, ConfigOverrides, LoadOptions, LogFormat};
    use crate::domain::lead::Locale;

    static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();

    const TELEGRAM_VARS: [&str; 2] =
        ["ROMUPUNKT_TELEGRAM_BOT_TOKEN", "ROMUPUNKT_TELEGRAM_OPERATOR_ID"];

    fn env_lock() -> &'static Mutex<()> {
        ENV_LOCK.get_or_init(|| Mutex::new(()))
    }

    fn set_telegram_env() {
        env::set_var("ROMUPUNKT_TELEGRAM_BOT_TOKEN", "123456:test-token");
        env::set_var("ROMUPUNKT_TELEGRAM_OPERATOR_ID", "9001");
    }

    fn clear_vars(vars: &[&str]) {
        for var in vars {
            env::remove_var(var);
        }
    }

    fn ensure(condition: bool, message: &'static str) -> Result<(), String> {
        if condition {
            Ok(())
        } else {
            Err(message.to_string())
        }
    }

    #[test]
    fn defaults_match_intake_policy() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;
        set_telegram_env();

        let result = (|| -> Result<(), String> {
            let config = AppConfig::load(LoadOptions::default())
                .map_err(|err| format!("config load failed: {err}"))?;

            ensure(config.intake.max_photos == 4, "max photos defaults to 4")?;
            ensure(config.intake.min_photos == 1, "min photos defaults to 1")?;
            ensure(config.intake.dedup_window_secs == 120, "dedup window defaults to 120s")?;
            ensure(!config.intake.ask_completeness, "completeness stage is off by default")?;
            ensure(config.telegram.operator_id == 9001, "operator id comes from env")?;
            Ok(())
        })();

        clear_vars(&TELEGRAM_VARS);
        result
    }

    #[test]
    fn file_load_supports_env_interpolation() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("TEST_ROMUPUNKT_TOKEN", "777:from-env");

        let result = (|| -> Result<(), String> {
            let dir = TempDir::new().map_err(|err: io::Error| err.to_string())?;
            let path = dir.path().join("romupunkt.toml");
            fs::write(
                &path,
                r#"
[telegram]
bot_token = "${TEST_ROMUPUNKT_TOKEN}"
operator_id = 42
operator_locale = "ru"

[intake]
max_photos = 5
default_locale = "ee"
ask_completeness = true
"#,
            )
            .map_err(|err| err.to_string())?;

            let config =
                AppConfig::load(LoadOptions { config_path: Some(path), ..LoadOptions::default() })
                    .map_err(|err| format!("config load failed: {err}"))?;

            ensure(
                config.telegram.bot_token.expose_secret() == "777:from-env",
                "bot token should be interpolated from environment",
            )?;
            ensure(config.telegram.operator_locale == Locale::Ru, "operator locale from file")?;
            ensure(config.intake.max_photos == 5, "max photos from file")?;
            ensure(config.intake.default_locale == Locale::Ee, "default locale from file")?;
            ensure(config.intake.ask_completeness, "completeness stage enabled from file")?;
            Ok(())
        })();

        clear_vars(&["TEST_ROMUPUNKT_TOKEN"]);
        result
    }

    #[test]
    fn logging_env_aliases_are_supported() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        set_telegram_env();
        env::set_var("ROMUPUNKT_LOG_LEVEL", "warn");
        env::set_var("ROMUPUNKT_LOG_FORMAT", "json");

        let result = (|| -> Result<(), String> {
            let config = AppConfig::load(LoadOptions::default())
                .map_err(|err| format!("config load failed: {err}"))?;

            ensure(config.logging.level == "warn", "log level should be set from env alias")?;
            ensure(
                matches!(config.logging.format, LogFormat::Json),
                "json logging format should be set from env alias",
            )?;
            Ok(())
        })();

        clear_vars(&TELEGRAM_VARS);
        clear_vars(&["ROMUPUNKT_LOG_LEVEL", "ROMUPUNKT_LOG_FORMAT"]);
        result
    }

    #[test]
    fn precedence_defaults_file_env_overrides() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("ROMUPUNKT_DATABASE_URL", "sqlite://from-env.db");
        env::set_var("ROMUPUNKT_TELEGRAM_BOT_TOKEN", "1:from-env");
        env::set_var("ROMUPUNKT_INTAKE_DEDUP_WINDOW_SECS", "90");

        let result = (|| -> Result<(), String> {
            let dir = TempDir::new().map_err(|err: io::Error| err.to_string())?;
            let path = dir.path().join("romupunkt.toml");
            fs::write(
                &path,
                r#"
[database]
url = "sqlite://from-file.db"

[telegram]
bot_token = "1:from-file"
operator_id = 5

[intake]
dedup_window_secs = 60

[logging]
level = "warn"
"#,
            )
            .map_err(|err| err.to_string())?;

            let config = AppConfig::load(LoadOptions {
                config_path: Some(path),
                overrides: ConfigOverrides {
                    database_url: Some("sqlite://from-override.db".to_string()),
                    log_level: Some("debug".to_string()),
                    ..ConfigOverrides::default()
                },
                ..LoadOptions::default()
            })
            .map_err(|err| format!("config load failed: {err}"))?;

            ensure(
                config.database.url == "sqlite://from-override.db",
                "override database url should win",
            )?;
            ensure(config.logging.level == "debug", "overridden log level should be debug")?;
            ensure(
                config.telegram.bot_token.expose_secret() == "1:from-env",
                "env bot token should win over file and defaults",
            )?;
            ensure(config.telegram.operator_id == 5, "file operator id survives")?;
            ensure(config.intake.dedup_window_secs == 90, "env dedup window beats file")?;
            Ok(())
        })();

        clear_vars(&[
            "ROMUPUNKT_DATABASE_URL",
            "ROMUPUNKT_TELEGRAM_BOT_TOKEN",
            "ROMUPUNKT_INTAKE_DEDUP_WINDOW_SECS",
        ]);
        result
    }

    #[test]
    fn validation_fails_fast_with_actionable_error() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("ROMUPUNKT_TELEGRAM_BOT_TOKEN", "no-colon-here");
        env::set_var("ROMUPUNKT_TELEGRAM_OPERATOR_ID", "9001");

        let result = (|| -> Result<(), String> {
            let error = match AppConfig::load(LoadOptions::default()) {
                Ok(_) => {
                    return Err("expected validation failure but config load succeeded".to_string())
                }
                Err(error) => error,
            };
            let has_message = matches!(
                error,
                ConfigError::Validation(ref message) if message.contains("telegram.bot_token")
            );
            ensure(has_message, "validation failure should mention telegram.bot_token")
        })();

        clear_vars(&TELEGRAM_VARS);
        result
    }

    #[test]
    fn min_photos_above_max_is_rejected() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        set_telegram_env();
        env::set_var("ROMUPUNKT_INTAKE_MIN_PHOTOS", "3");

        let result = (|| -> Result<(), String> {
            let outcome = AppConfig::load(LoadOptions {
                overrides: ConfigOverrides { max_photos: Some(2), ..ConfigOverrides::default() },
                ..LoadOptions::default()
            });
            ensure(
                matches!(
                    outcome,
                    Err(ConfigError::Validation(ref message)) if message.contains("min_photos")
                ),
                "min above max should fail validation",
            )
        })();

        clear_vars(&TELEGRAM_VARS);
        clear_vars(&["ROMUPUNKT_INTAKE_MIN_PHOTOS"]);
        result
    }

    #[test]
    fn invalid_numeric_env_override_is_reported() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        set_telegram_env();
        env::set_var("ROMUPUNKT_INTAKE_MAX_PHOTOS", "four");

        let result = (|| -> Result<(), String> {
            let outcome = AppConfig::load(LoadOptions::default());
            ensure(
                matches!(
                    outcome,
                    Err(ConfigError::InvalidEnvOverride { ref key, .. })
                        if key == "ROMUPUNKT_INTAKE_MAX_PHOTOS"
                ),
                "non-numeric max photos should be an env override error",
            )
        })();

        clear_vars(&TELEGRAM_VARS);
        clear_vars(&["ROMUPUNKT_INTAKE_MAX_PHOTOS"]);
        result
    }

    #[test]
    fn secret_values_are_not_leaked_by_debug() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("ROMUPUNKT_TELEGRAM_BOT_TOKEN", "31337:super-secret-value");
        env::set_var("ROMUPUNKT_TELEGRAM_OPERATOR_ID", "9001");

        let result = (|| -> Result<(), String> {
            let config = AppConfig::load(LoadOptions::default())
                .map_err(|err| format!("config load failed: {err}"))?;
            let debug = format!("{config:?}");

            ensure(!debug.contains("super-secret-value"), "debug output should not contain token")?;
            ensure(
                matches!(config.logging.format, LogFormat::Compact),
                "default logging format should be compact",
            )?;
            Ok(())
        })();

        clear_vars(&TELEGRAM_VARS);
        result
    }

    #[test]
    fn photo_session_ttl_beyond_a_year_is_rejected() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;
        set_telegram_env();

        let result = (|| -> Result<(), String> {
            let dir = TempDir::new().map_err(|err: io::Error| err.to_string())?;
            let path = dir.path().join("romupunkt.toml");
            fs::write(&path, "[intake]\nphoto_session_ttl_hours = 9223372036854775807\n")
                .map_err(|err| err.to_string())?;

            let outcome =
                AppConfig::load(LoadOptions { config_path: Some(path), ..LoadOptions::default() });
            ensure(
                matches!(
                    outcome,
                    Err(ConfigError::Validation(ref message))
                        if message.contains("photo_session_ttl_hours")
                ),
                "an unbounded ttl should fail validation",
            )?;

            let path = dir.path().join("year.toml");
            fs::write(&path, "[intake]\nphoto_session_ttl_hours = 8760\n")
                .map_err(|err| err.to_string())?;
            let config =
                AppConfig::load(LoadOptions { config_path: Some(path), ..LoadOptions::default() })
                    .map_err(|err| format!("config load failed: {err}"))?;
            ensure(config.intake.photo_session_ttl_hours == 8760, "a one year ttl is accepted")
        })();

        clear_vars(&TELEGRAM_VARS);
        result
    }

    #[test]
    fn bot_username_is_read_without_its_at_sign() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;
        set_telegram_env();
        env::set_var("ROMUPUNKT_TELEGRAM_BOT_USERNAME", "@romupunkt_bot");

        let result = (|| -> Result<(), String> {
            let config = AppConfig::load(LoadOptions::default())
                .map_err(|err| format!("config load failed: {err}"))?;
            ensure(
                config.telegram.bot_username.as_deref() == Some("romupunkt_bot"),
                "leading @ is stripped",
            )?;

            env::set_var("ROMUPUNKT_TELEGRAM_BOT_USERNAME", "romu punkt");
            let outcome = AppConfig::load(LoadOptions::default());
            ensure(
                matches!(
                    outcome,
                    Err(ConfigError::Validation(ref message)) if message.contains("bot_username")
                ),
                "a username with spaces should fail validation",
            )
        })();

        clear_vars(&TELEGRAM_VARS);
        clear_vars(&["ROMUPUNKT_TELEGRAM_BOT_USERNAME"]);
        result
    }
}
