//! Layered configuration and dotenv-backed credential storage.
//!
//! Resolution merges, highest precedence first: explicit builder arguments,
//! process environment, a `./.env` file, and (when `VENICE_USE_GLOBAL_CONFIG`
//! resolves truthy) a global dotenv under the platform config directory.
//! Resolution reads files and the environment only; it never touches the
//! network.

use std::collections::{BTreeSet, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::errors::{Error, Result};
use crate::http::{RetryPolicy, DEFAULT_RETRY_STATUS_CODES};

pub const ENV_API_KEY: &str = "VENICE_API_KEY";
pub const ENV_BASE_URL: &str = "VENICE_BASE_URL";
pub const ENV_TIMEOUT: &str = "VENICE_TIMEOUT";
pub const ENV_MAX_RETRIES: &str = "VENICE_MAX_RETRIES";
pub const ENV_RETRY_BACKOFF_FACTOR: &str = "VENICE_RETRY_BACKOFF_FACTOR";
pub const ENV_RETRY_STATUS_CODES: &str = "VENICE_RETRY_STATUS_CODES";
pub const ENV_POOL_CONNECTIONS: &str = "VENICE_POOL_CONNECTIONS";
pub const ENV_POOL_MAXSIZE: &str = "VENICE_POOL_MAXSIZE";
pub const ENV_USE_GLOBAL_CONFIG: &str = "VENICE_USE_GLOBAL_CONFIG";

const TRUTHY_LITERALS: [&str; 5] = ["1", "true", "TRUE", "yes", "YES"];

/// A read-only provider of string configuration values.
pub trait ConfigSource {
    fn get(&self, key: &str) -> Option<String>;
}

/// Process environment variables.
pub struct EnvSource;

impl ConfigSource for EnvSource {
    fn get(&self, key: &str) -> Option<String> {
        std::env::var(key).ok()
    }
}

/// Values parsed from a dotenv file. Later keys override earlier ones within
/// the same file.
pub struct DotenvSource {
    values: HashMap<String, String>,
}

impl DotenvSource {
    pub fn from_path(path: &Path) -> Result<Self> {
        let iter = dotenvy::from_path_iter(path)
            .map_err(|e| Error::config(format!("failed to read {}: {e}", path.display())))?;
        let mut values = HashMap::new();
        for item in iter {
            let (key, value) = item
                .map_err(|e| Error::config(format!("malformed line in {}: {e}", path.display())))?;
            values.insert(key, value);
        }
        Ok(Self { values })
    }
}

impl ConfigSource for DotenvSource {
    fn get(&self, key: &str) -> Option<String> {
        self.values.get(key).cloned()
    }
}

impl ConfigSource for HashMap<String, String> {
    fn get(&self, key: &str) -> Option<String> {
        HashMap::get(self, key).cloned()
    }
}

/// Resolved, immutable SDK configuration.
#[derive(Clone)]
pub struct Config {
    pub api_key: String,
    pub base_url: String,
    pub timeout: Duration,
    pub max_retries: u32,
    /// Base retry delay in seconds; attempt `k` waits `factor * 2^(k-1)`.
    pub retry_backoff_factor: f64,
    pub retry_status_codes: BTreeSet<u16>,
    pub pool_connections: usize,
    pub pool_maxsize: usize,
    pub use_global_config: bool,
    /// Retention bound (event count) for the rate-limit recorder.
    pub metrics_retention: usize,
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("api_key", &"<redacted>")
            .field("base_url", &self.base_url)
            .field("timeout", &self.timeout)
            .field("max_retries", &self.max_retries)
            .field("retry_backoff_factor", &self.retry_backoff_factor)
            .field("retry_status_codes", &self.retry_status_codes)
            .field("pool_connections", &self.pool_connections)
            .field("pool_maxsize", &self.pool_maxsize)
            .field("use_global_config", &self.use_global_config)
            .field("metrics_retention", &self.metrics_retention)
            .finish()
    }
}

impl Config {
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }

    pub(crate) fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_retries,
            backoff_ms: (self.retry_backoff_factor * 1000.0) as u64,
            retry_status_codes: self.retry_status_codes.clone(),
        }
    }
}

/// Explicit overrides layered above environment and dotenv sources.
#[derive(Default)]
pub struct ConfigBuilder {
    api_key: Option<String>,
    base_url: Option<String>,
    timeout: Option<Duration>,
    max_retries: Option<u32>,
    retry_backoff_factor: Option<f64>,
    retry_status_codes: Option<BTreeSet<u16>>,
    pool_connections: Option<usize>,
    pool_maxsize: Option<usize>,
    use_global_config: Option<bool>,
    metrics_retention: Option<usize>,
}

impl ConfigBuilder {
    pub fn api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    pub fn base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into());
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = Some(max_retries);
        self
    }

    pub fn retry_backoff_factor(mut self, factor: f64) -> Self {
        self.retry_backoff_factor = Some(factor);
        self
    }

    pub fn retry_status_codes(mut self, codes: impl IntoIterator<Item = u16>) -> Self {
        self.retry_status_codes = Some(codes.into_iter().collect());
        self
    }

    pub fn pool_connections(mut self, pool_connections: usize) -> Self {
        self.pool_connections = Some(pool_connections);
        self
    }

    pub fn pool_maxsize(mut self, pool_maxsize: usize) -> Self {
        self.pool_maxsize = Some(pool_maxsize);
        self
    }

    pub fn use_global_config(mut self, enabled: bool) -> Self {
        self.use_global_config = Some(enabled);
        self
    }

    pub fn metrics_retention(mut self, retention: usize) -> Self {
        self.metrics_retention = Some(retention);
        self
    }

    /// Resolve against the real layers: process environment, `./.env`, and
    /// the gated global dotenv.
    pub fn load(self) -> Result<Config> {
        let local = existing_dotenv(Path::new(".env"))?;
        // A platform without a config directory simply has no global layer.
        let global = match dirs::config_dir() {
            Some(base) => existing_dotenv(&base.join("venice").join(".env"))?,
            None => None,
        };
        self.resolve_layered(
            &EnvSource,
            local.as_ref().map(|s| s as &dyn ConfigSource),
            global.as_ref().map(|s| s as &dyn ConfigSource),
        )
    }

    /// Pure resolution over injected layers, ordered: explicit builder values,
    /// `env`, `local`, then `global` — the last only when the
    /// `VENICE_USE_GLOBAL_CONFIG` gate resolves truthy from the layers above it.
    pub fn resolve_layered(
        self,
        env: &dyn ConfigSource,
        local: Option<&dyn ConfigSource>,
        global: Option<&dyn ConfigSource>,
    ) -> Result<Config> {
        let mut layers: Vec<&dyn ConfigSource> = vec![env];
        if let Some(local) = local {
            layers.push(local);
        }

        let use_global = match self.use_global_config {
            Some(explicit) => explicit,
            None => lookup(&layers, ENV_USE_GLOBAL_CONFIG)
                .map(|v| is_truthy(&v))
                .unwrap_or(false),
        };
        if use_global {
            if let Some(global) = global {
                layers.push(global);
            }
        }

        let api_key = self
            .api_key
            .filter(|k| !k.trim().is_empty())
            .or_else(|| lookup(&layers, ENV_API_KEY).filter(|k| !k.trim().is_empty()))
            .ok_or_else(|| {
                Error::config(
                    "no API key found; set VENICE_API_KEY or pass one explicitly",
                )
            })?;

        let base_url = match self.base_url.or_else(|| lookup(&layers, ENV_BASE_URL)) {
            Some(raw) => validate_base_url(&raw)?,
            None => crate::DEFAULT_BASE_URL.to_string(),
        };

        let timeout = match self.timeout {
            Some(t) => t,
            None => match lookup(&layers, ENV_TIMEOUT) {
                Some(raw) => parse_timeout(&raw)?,
                None => crate::DEFAULT_TIMEOUT,
            },
        };
        if timeout.is_zero() {
            return Err(Error::config("timeout must be positive"));
        }

        let max_retries = match self.max_retries {
            Some(n) => n,
            None => parse_field(&layers, ENV_MAX_RETRIES, 3)?,
        };

        let retry_backoff_factor = match self.retry_backoff_factor {
            Some(f) => f,
            None => parse_field(&layers, ENV_RETRY_BACKOFF_FACTOR, 0.5)?,
        };
        if !retry_backoff_factor.is_finite() || retry_backoff_factor < 0.0 {
            return Err(Error::config("retry backoff factor must be non-negative"));
        }

        let retry_status_codes = match self.retry_status_codes {
            Some(codes) => codes,
            None => match lookup(&layers, ENV_RETRY_STATUS_CODES) {
                Some(raw) => parse_status_codes(&raw)?,
                None => DEFAULT_RETRY_STATUS_CODES.into_iter().collect(),
            },
        };

        let pool_connections = match self.pool_connections {
            Some(n) => n,
            None => parse_field(&layers, ENV_POOL_CONNECTIONS, 10)?,
        };
        let pool_maxsize = match self.pool_maxsize {
            Some(n) => n,
            None => parse_field(&layers, ENV_POOL_MAXSIZE, 20)?,
        };

        Ok(Config {
            api_key,
            base_url,
            timeout,
            max_retries,
            retry_backoff_factor,
            retry_status_codes,
            pool_connections,
            pool_maxsize,
            use_global_config: use_global,
            metrics_retention: self.metrics_retention.unwrap_or(crate::DEFAULT_METRICS_RETENTION),
        })
    }
}

fn lookup(layers: &[&dyn ConfigSource], key: &str) -> Option<String> {
    layers.iter().find_map(|source| source.get(key))
}

fn is_truthy(value: &str) -> bool {
    TRUTHY_LITERALS.contains(&value.trim())
}

fn existing_dotenv(path: &Path) -> Result<Option<DotenvSource>> {
    if path.is_file() {
        DotenvSource::from_path(path).map(Some)
    } else {
        Ok(None)
    }
}

fn parse_field<T: std::str::FromStr>(
    layers: &[&dyn ConfigSource],
    key: &str,
    default: T,
) -> Result<T> {
    match lookup(layers, key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| Error::config(format!("invalid value for {key}: {raw:?}"))),
        None => Ok(default),
    }
}

fn parse_timeout(raw: &str) -> Result<Duration> {
    let secs: f64 = raw
        .trim()
        .parse()
        .map_err(|_| Error::config(format!("invalid value for {ENV_TIMEOUT}: {raw:?}")))?;
    if !secs.is_finite() || secs <= 0.0 {
        return Err(Error::config("timeout must be positive"));
    }
    Ok(Duration::from_secs_f64(secs))
}

fn parse_status_codes(raw: &str) -> Result<BTreeSet<u16>> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            s.parse()
                .map_err(|_| Error::config(format!("invalid status code in {ENV_RETRY_STATUS_CODES}: {s:?}")))
        })
        .collect()
}

fn validate_base_url(raw: &str) -> Result<String> {
    let url = reqwest::Url::parse(raw)
        .map_err(|e| Error::config(format!("invalid base url {raw:?}: {e}")))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(Error::config(format!(
            "base url must use http or https, got {:?}",
            url.scheme()
        )));
    }
    if url.host_str().is_none() {
        return Err(Error::config("base url is missing a host"));
    }
    Ok(raw.trim_end_matches('/').to_string())
}

/// Which dotenv a credential operation targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialScope {
    /// `./.env` in the working directory.
    Local,
    /// `{config_dir}/venice/.env` (`$XDG_CONFIG_HOME` on Linux, `%APPDATA%` on Windows).
    Global,
}

pub fn credential_path(scope: CredentialScope) -> Result<PathBuf> {
    match scope {
        CredentialScope::Local => Ok(PathBuf::from(".env")),
        CredentialScope::Global => global_env_path(),
    }
}

fn global_env_path() -> Result<PathBuf> {
    let base = dirs::config_dir()
        .ok_or_else(|| Error::config("no platform config directory available"))?;
    Ok(base.join("venice").join(".env"))
}

/// Read `VENICE_API_KEY` from the scope's dotenv, if the file exists.
pub fn read_api_key(scope: CredentialScope) -> Result<Option<String>> {
    let path = credential_path(scope)?;
    Ok(existing_dotenv(&path)?.and_then(|source| source.get(ENV_API_KEY)))
}

/// Write `VENICE_API_KEY` into the scope's dotenv, preserving unrelated lines.
///
/// Parent directories of the global dotenv are created as needed.
pub fn write_api_key(scope: CredentialScope, api_key: &str) -> Result<PathBuf> {
    if api_key.trim().is_empty() {
        return Err(Error::config("refusing to store an empty API key"));
    }
    let path = credential_path(scope)?;
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)
                .map_err(|e| Error::config(format!("cannot create {}: {e}", parent.display())))?;
        }
    }

    let existing = if path.is_file() {
        fs::read_to_string(&path)
            .map_err(|e| Error::config(format!("cannot read {}: {e}", path.display())))?
    } else {
        String::new()
    };

    fs::write(&path, upsert_env_line(&existing, ENV_API_KEY, api_key))
        .map_err(|e| Error::config(format!("cannot write {}: {e}", path.display())))?;
    Ok(path)
}

/// Replace the first `key=` line in a dotenv body, or append one, keeping
/// every other line (comments included) untouched.
fn upsert_env_line(existing: &str, key: &str, value: &str) -> String {
    let entry = format!("{key}={value}");
    let prefix = format!("{key}=");
    let mut lines: Vec<String> = Vec::new();
    let mut replaced = false;
    for line in existing.lines() {
        if !replaced && line.trim_start().starts_with(&prefix) {
            lines.push(entry.clone());
            replaced = true;
        } else {
            lines.push(line.to_string());
        }
    }
    if !replaced {
        lines.push(entry);
    }
    let mut contents = lines.join("\n");
    contents.push('\n');
    contents
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write as _;

    fn map(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn empty() -> HashMap<String, String> {
        HashMap::new()
    }

    #[test]
    fn explicit_value_beats_every_layer() {
        let env = map(&[(ENV_API_KEY, "from-env")]);
        let local = map(&[(ENV_API_KEY, "from-local")]);
        let config = Config::builder()
            .api_key("explicit")
            .resolve_layered(&env, Some(&local), None)
            .unwrap();
        assert_eq!(config.api_key, "explicit");
    }

    #[test]
    fn env_beats_local_dotenv() {
        let env = map(&[(ENV_API_KEY, "from-env")]);
        let local = map(&[(ENV_API_KEY, "from-local")]);
        let config = Config::builder()
            .resolve_layered(&env, Some(&local), None)
            .unwrap();
        assert_eq!(config.api_key, "from-env");
    }

    #[test]
    fn global_layer_requires_the_gate() {
        let global = map(&[(ENV_API_KEY, "from-global")]);

        let err = Config::builder()
            .resolve_layered(&empty(), None, Some(&global))
            .unwrap_err();
        assert!(matches!(err, Error::Config(_)));

        let env = map(&[(ENV_USE_GLOBAL_CONFIG, "1")]);
        let config = Config::builder()
            .resolve_layered(&env, None, Some(&global))
            .unwrap();
        assert_eq!(config.api_key, "from-global");
        assert!(config.use_global_config);
    }

    #[test]
    fn gate_literals_match_the_documented_set() {
        for value in ["1", "true", "TRUE", "yes", "YES"] {
            assert!(is_truthy(value), "{value}");
        }
        for value in ["0", "false", "True", "on", ""] {
            assert!(!is_truthy(value), "{value}");
        }
    }

    #[test]
    fn defaults_apply_when_no_layer_defines_a_field() {
        let env = map(&[(ENV_API_KEY, "k")]);
        let config = Config::builder().resolve_layered(&env, None, None).unwrap();
        assert_eq!(config.base_url, crate::DEFAULT_BASE_URL);
        assert_eq!(config.timeout, Duration::from_secs(30));
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.retry_backoff_factor, 0.5);
        assert_eq!(config.pool_connections, 10);
        assert_eq!(config.pool_maxsize, 20);
        assert!(config.retry_status_codes.contains(&429));
        assert_eq!(config.metrics_retention, 10_000);
    }

    #[test]
    fn numeric_fields_parse_from_layers() {
        let env = map(&[
            (ENV_API_KEY, "k"),
            (ENV_TIMEOUT, "2.5"),
            (ENV_MAX_RETRIES, "5"),
            (ENV_RETRY_BACKOFF_FACTOR, "0.25"),
            (ENV_RETRY_STATUS_CODES, "500, 503"),
            (ENV_POOL_CONNECTIONS, "4"),
            (ENV_POOL_MAXSIZE, "8"),
        ]);
        let config = Config::builder().resolve_layered(&env, None, None).unwrap();
        assert_eq!(config.timeout, Duration::from_secs_f64(2.5));
        assert_eq!(config.max_retries, 5);
        assert_eq!(config.retry_backoff_factor, 0.25);
        assert_eq!(
            config.retry_status_codes,
            [500u16, 503].into_iter().collect()
        );
        assert_eq!(config.pool_connections, 4);
        assert_eq!(config.pool_maxsize, 8);
    }

    #[test]
    fn invalid_values_are_config_errors() {
        for pairs in [
            vec![(ENV_API_KEY, "k"), (ENV_TIMEOUT, "soon")],
            vec![(ENV_API_KEY, "k"), (ENV_TIMEOUT, "0")],
            vec![(ENV_API_KEY, "k"), (ENV_MAX_RETRIES, "-1")],
            vec![(ENV_API_KEY, "k"), (ENV_RETRY_STATUS_CODES, "500,oops")],
            vec![(ENV_API_KEY, "k"), (ENV_BASE_URL, "ftp://venice.ai")],
            vec![(ENV_API_KEY, "k"), (ENV_BASE_URL, "not a url")],
        ] {
            let env = map(&pairs);
            let err = Config::builder()
                .resolve_layered(&env, None, None)
                .unwrap_err();
            assert!(matches!(err, Error::Config(_)), "{pairs:?}");
        }
    }

    #[test]
    fn blank_api_key_does_not_satisfy_resolution() {
        let env = map(&[(ENV_API_KEY, "   ")]);
        let err = Config::builder()
            .resolve_layered(&env, None, None)
            .unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn dotenv_files_parse_comments_and_overrides() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "# credentials").unwrap();
        writeln!(file).unwrap();
        writeln!(file, "VENICE_API_KEY=first").unwrap();
        writeln!(file, "VENICE_BASE_URL=https://example.test/api/v1").unwrap();
        writeln!(file, "VENICE_API_KEY=second").unwrap();
        let source = DotenvSource::from_path(file.path()).unwrap();
        assert_eq!(source.get(ENV_API_KEY).as_deref(), Some("second"));
        assert_eq!(
            source.get(ENV_BASE_URL).as_deref(),
            Some("https://example.test/api/v1")
        );
    }

    #[test]
    fn base_url_trailing_slash_is_normalized() {
        let env = map(&[
            (ENV_API_KEY, "k"),
            (ENV_BASE_URL, "https://example.test/api/v1/"),
        ]);
        let config = Config::builder().resolve_layered(&env, None, None).unwrap();
        assert_eq!(config.base_url, "https://example.test/api/v1");
    }

    #[test]
    fn upsert_replaces_in_place_and_preserves_comments() {
        let existing = "# credentials\nVENICE_API_KEY=old\nVENICE_BASE_URL=https://x\n";
        let updated = upsert_env_line(existing, ENV_API_KEY, "new");
        assert_eq!(
            updated,
            "# credentials\nVENICE_API_KEY=new\nVENICE_BASE_URL=https://x\n"
        );

        let appended = upsert_env_line("# empty file\n", ENV_API_KEY, "fresh");
        assert_eq!(appended, "# empty file\nVENICE_API_KEY=fresh\n");

        let from_scratch = upsert_env_line("", ENV_API_KEY, "k");
        assert_eq!(from_scratch, "VENICE_API_KEY=k\n");
    }

    #[test]
    fn debug_redacts_the_api_key() {
        let env = map(&[(ENV_API_KEY, "vk-secret")]);
        let config = Config::builder().resolve_layered(&env, None, None).unwrap();
        let rendered = format!("{config:?}");
        assert!(!rendered.contains("vk-secret"));
        assert!(rendered.contains("<redacted>"));
    }
}
