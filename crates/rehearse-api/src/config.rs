//! Server configuration.

use serde::{Deserialize, Serialize};

use rehearse_core::{Error, Result};

/// Rate limiting configuration.
///
/// Two fixed-window instances share this block: the credential-scoped front
/// door and the per-user submission limiter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Whether rate limiting is enabled.
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Front-door requests per window per credential.
    #[serde(default = "default_requests_per_window")]
    pub requests_per_window: u32,

    /// Front-door window length in seconds.
    #[serde(default = "default_window_seconds")]
    pub window_seconds: u64,

    /// Per-user evaluation submissions per window.
    #[serde(default = "default_user_submissions_per_window")]
    pub user_submissions_per_window: u32,

    /// Per-user window length in seconds.
    #[serde(default = "default_user_window_seconds")]
    pub user_window_seconds: u64,
}

const fn default_enabled() -> bool {
    true
}

const fn default_requests_per_window() -> u32 {
    60
}

const fn default_window_seconds() -> u64 {
    60
}

const fn default_user_submissions_per_window() -> u32 {
    10
}

const fn default_user_window_seconds() -> u64 {
    60
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            requests_per_window: default_requests_per_window(),
            window_seconds: default_window_seconds(),
            user_submissions_per_window: default_user_submissions_per_window(),
            user_window_seconds: default_user_window_seconds(),
        }
    }
}

/// Orchestration timing knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestrationConfig {
    /// How long a submission blocks waiting for a fast result, in
    /// milliseconds. Past this the caller gets a pollable job handle.
    #[serde(default = "default_sync_wait_ms")]
    pub sync_wait_ms: u64,

    /// Poll interval hint returned with pending responses, in milliseconds.
    #[serde(default = "default_poll_after_ms")]
    pub poll_after_ms: u64,

    /// TTL of in-process idempotency claims, in milliseconds.
    #[serde(default = "default_claim_ttl_ms")]
    pub claim_ttl_ms: u64,

    /// Number of evaluation workers to run in-process.
    #[serde(default = "default_worker_count")]
    pub worker_count: usize,
}

const fn default_sync_wait_ms() -> u64 {
    2500
}

const fn default_poll_after_ms() -> u64 {
    2000
}

const fn default_claim_ttl_ms() -> u64 {
    10_000
}

const fn default_worker_count() -> usize {
    4
}

impl Default for OrchestrationConfig {
    fn default() -> Self {
        Self {
            sync_wait_ms: default_sync_wait_ms(),
            poll_after_ms: default_poll_after_ms(),
            claim_ttl_ms: default_claim_ttl_ms(),
            worker_count: default_worker_count(),
        }
    }
}

impl OrchestrationConfig {
    /// The synchronous wait budget as a `Duration`.
    #[must_use]
    pub const fn sync_wait(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.sync_wait_ms)
    }

    /// The claim TTL as a `Duration`.
    #[must_use]
    pub const fn claim_ttl(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.claim_ttl_ms)
    }
}

/// JWT configuration for production authentication.
#[derive(Clone, Serialize, Deserialize)]
pub struct JwtConfig {
    /// HS256 secret used to verify bearer tokens.
    ///
    /// Delivered via secret manager / env var in production, never checked
    /// into config files.
    #[serde(default)]
    pub hs256_secret: Option<String>,

    /// Optional issuer (`iss`) to enforce.
    #[serde(default)]
    pub issuer: Option<String>,

    /// Optional audience (`aud`) to enforce.
    #[serde(default)]
    pub audience: Option<String>,

    /// Claim name that contains the user identifier.
    #[serde(default = "default_user_claim")]
    pub user_claim: String,
}

fn default_user_claim() -> String {
    "sub".to_string()
}

impl Default for JwtConfig {
    fn default() -> Self {
        Self {
            hs256_secret: None,
            issuer: None,
            audience: None,
            user_claim: default_user_claim(),
        }
    }
}

impl std::fmt::Debug for JwtConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JwtConfig")
            .field("hs256_secret", &self.hs256_secret.as_ref().map(|_| "[REDACTED]"))
            .field("issuer", &self.issuer)
            .field("audience", &self.audience)
            .field("user_claim", &self.user_claim)
            .finish()
    }
}

/// CORS configuration for browser-based access.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorsConfig {
    /// Allowed origins. Use `["*"]` to allow all origins (development only).
    /// Empty list disables CORS entirely.
    pub allowed_origins: Vec<String>,

    /// Max age for preflight cache (seconds).
    pub max_age_seconds: u64,
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            // Disabled by default; set explicit origins for production.
            allowed_origins: Vec::new(),
            max_age_seconds: 3600,
        }
    }
}

/// Configuration for the Rehearse API server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// HTTP server port.
    #[serde(default = "default_http_port")]
    pub http_port: u16,

    /// Enable debug mode.
    ///
    /// When enabled:
    /// - `RequestContext` is extracted from `X-Api-Key` / `X-User-Id`
    ///   headers (dev/tests)
    ///
    /// When disabled:
    /// - `Authorization` is required (JWT claim extraction + signature
    ///   verification)
    #[serde(default)]
    pub debug: bool,

    /// Optional shared secret required to access `/metrics`.
    ///
    /// Empty/whitespace values are treated as unset.
    #[serde(default)]
    pub metrics_secret: Option<String>,

    /// CORS configuration.
    #[serde(default)]
    pub cors: CorsConfig,

    /// JWT authentication configuration (used when `debug` is false).
    #[serde(default)]
    pub jwt: JwtConfig,

    /// Rate limiting configuration.
    #[serde(default)]
    pub rate_limit: RateLimitConfig,

    /// Orchestration timing configuration.
    #[serde(default)]
    pub orchestration: OrchestrationConfig,
}

const fn default_http_port() -> u16 {
    8080
}

impl Default for Config {
    fn default() -> Self {
        Self {
            http_port: default_http_port(),
            debug: false,
            metrics_secret: None,
            cors: CorsConfig::default(),
            jwt: JwtConfig::default(),
            rate_limit: RateLimitConfig::default(),
            orchestration: OrchestrationConfig::default(),
        }
    }
}

const MIN_SYNC_WAIT_MS: u64 = 100;
const MAX_SYNC_WAIT_MS: u64 = 30_000;

impl Config {
    /// Loads configuration from environment variables.
    ///
    /// Supported env vars:
    /// - `REHEARSE_HTTP_PORT`
    /// - `REHEARSE_DEBUG`
    /// - `REHEARSE_METRICS_SECRET`
    /// - `REHEARSE_CORS_ALLOWED_ORIGINS` (comma-separated, or `*`)
    /// - `REHEARSE_CORS_MAX_AGE_SECONDS`
    /// - `REHEARSE_JWT_SECRET`
    /// - `REHEARSE_JWT_ISSUER`
    /// - `REHEARSE_JWT_AUDIENCE`
    /// - `REHEARSE_JWT_USER_CLAIM`
    /// - `REHEARSE_RATE_LIMIT_ENABLED`
    /// - `REHEARSE_RATE_LIMIT_REQUESTS_PER_WINDOW`
    /// - `REHEARSE_RATE_LIMIT_WINDOW_SECONDS`
    /// - `REHEARSE_RATE_LIMIT_USER_SUBMISSIONS_PER_WINDOW`
    /// - `REHEARSE_RATE_LIMIT_USER_WINDOW_SECONDS`
    /// - `REHEARSE_SYNC_WAIT_MS` (100-30000)
    /// - `REHEARSE_POLL_AFTER_MS`
    /// - `REHEARSE_CLAIM_TTL_MS`
    /// - `REHEARSE_WORKER_COUNT`
    ///
    /// # Errors
    ///
    /// Returns an error if any environment variable is present but cannot be
    /// parsed, or a value is outside its allowed range.
    #[allow(clippy::cognitive_complexity, clippy::too_many_lines)]
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Some(port) = env_u16("REHEARSE_HTTP_PORT")? {
            config.http_port = port;
        }
        if let Some(debug) = env_bool("REHEARSE_DEBUG")? {
            config.debug = debug;
        }
        config.metrics_secret = env_string("REHEARSE_METRICS_SECRET");

        if let Some(origins) = env_string("REHEARSE_CORS_ALLOWED_ORIGINS") {
            config.cors.allowed_origins = parse_cors_allowed_origins(&origins);
        }
        if let Some(max_age) = env_u64("REHEARSE_CORS_MAX_AGE_SECONDS")? {
            config.cors.max_age_seconds = max_age;
        }

        if let Some(secret) = env_string("REHEARSE_JWT_SECRET") {
            config.jwt.hs256_secret = Some(secret);
        }
        if let Some(issuer) = env_string("REHEARSE_JWT_ISSUER") {
            config.jwt.issuer = Some(issuer);
        }
        if let Some(audience) = env_string("REHEARSE_JWT_AUDIENCE") {
            config.jwt.audience = Some(audience);
        }
        if let Some(claim) = env_string("REHEARSE_JWT_USER_CLAIM") {
            config.jwt.user_claim = claim;
        }

        if let Some(enabled) = env_bool("REHEARSE_RATE_LIMIT_ENABLED")? {
            config.rate_limit.enabled = enabled;
        }
        if let Some(limit) = env_u32("REHEARSE_RATE_LIMIT_REQUESTS_PER_WINDOW")? {
            config.rate_limit.requests_per_window = limit;
        }
        if let Some(secs) = env_u64("REHEARSE_RATE_LIMIT_WINDOW_SECONDS")? {
            if secs == 0 {
                return Err(Error::validation(
                    "REHEARSE_RATE_LIMIT_WINDOW_SECONDS must be greater than 0",
                ));
            }
            config.rate_limit.window_seconds = secs;
        }
        if let Some(limit) = env_u32("REHEARSE_RATE_LIMIT_USER_SUBMISSIONS_PER_WINDOW")? {
            config.rate_limit.user_submissions_per_window = limit;
        }
        if let Some(secs) = env_u64("REHEARSE_RATE_LIMIT_USER_WINDOW_SECONDS")? {
            if secs == 0 {
                return Err(Error::validation(
                    "REHEARSE_RATE_LIMIT_USER_WINDOW_SECONDS must be greater than 0",
                ));
            }
            config.rate_limit.user_window_seconds = secs;
        }

        if let Some(ms) = env_u64("REHEARSE_SYNC_WAIT_MS")? {
            if !(MIN_SYNC_WAIT_MS..=MAX_SYNC_WAIT_MS).contains(&ms) {
                return Err(Error::validation(format!(
                    "REHEARSE_SYNC_WAIT_MS must be between {MIN_SYNC_WAIT_MS} and {MAX_SYNC_WAIT_MS}"
                )));
            }
            config.orchestration.sync_wait_ms = ms;
        }
        if let Some(ms) = env_u64("REHEARSE_POLL_AFTER_MS")? {
            config.orchestration.poll_after_ms = ms;
        }
        if let Some(ms) = env_u64("REHEARSE_CLAIM_TTL_MS")? {
            config.orchestration.claim_ttl_ms = ms;
        }
        if let Some(count) = env_usize("REHEARSE_WORKER_COUNT")? {
            if count == 0 {
                return Err(Error::validation(
                    "REHEARSE_WORKER_COUNT must be greater than 0",
                ));
            }
            config.orchestration.worker_count = count;
        }

        if !config.debug && config.jwt.hs256_secret.is_none() {
            return Err(Error::validation(
                "REHEARSE_JWT_SECRET is required when REHEARSE_DEBUG=false",
            ));
        }

        Ok(config)
    }
}

fn env_string(name: &str) -> Option<String> {
    std::env::var(name).ok().and_then(|v| {
        let trimmed = v.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    })
}

fn env_u16(name: &str) -> Result<Option<u16>> {
    let Some(v) = env_string(name) else {
        return Ok(None);
    };
    v.parse::<u16>()
        .map(Some)
        .map_err(|e| Error::validation(format!("{name} must be a u16: {e}")))
}

fn env_u32(name: &str) -> Result<Option<u32>> {
    let Some(v) = env_string(name) else {
        return Ok(None);
    };
    v.parse::<u32>()
        .map(Some)
        .map_err(|e| Error::validation(format!("{name} must be a u32: {e}")))
}

fn env_u64(name: &str) -> Result<Option<u64>> {
    let Some(v) = env_string(name) else {
        return Ok(None);
    };
    v.parse::<u64>()
        .map(Some)
        .map_err(|e| Error::validation(format!("{name} must be a u64: {e}")))
}

fn env_usize(name: &str) -> Result<Option<usize>> {
    let Some(v) = env_string(name) else {
        return Ok(None);
    };
    v.parse::<usize>()
        .map(Some)
        .map_err(|e| Error::validation(format!("{name} must be a usize: {e}")))
}

fn parse_bool(name: &str, value: &str) -> Result<bool> {
    let value = value.trim().to_ascii_lowercase();
    match value.as_str() {
        "true" | "1" | "yes" | "y" => Ok(true),
        "false" | "0" | "no" | "n" => Ok(false),
        _ => Err(Error::validation(format!(
            "{name} must be a boolean (true/false/1/0)"
        ))),
    }
}

fn env_bool(name: &str) -> Result<Option<bool>> {
    let Some(v) = env_string(name) else {
        return Ok(None);
    };
    parse_bool(name, &v).map(Some)
}

fn parse_cors_allowed_origins(value: &str) -> Vec<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Vec::new();
    }
    if trimmed == "*" {
        return vec!["*".to_string()];
    }

    trimmed
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let config = Config::default();
        assert!(!config.debug);
        assert_eq!(
            RateLimitConfig::default().requests_per_window,
            default_requests_per_window()
        );
        assert_eq!(
            OrchestrationConfig::default().sync_wait_ms,
            default_sync_wait_ms()
        );
    }

    #[test]
    fn parse_bool_accepts_common_spellings() {
        assert!(parse_bool("TEST", "true").unwrap());
        assert!(parse_bool("TEST", "1").unwrap());
        assert!(!parse_bool("TEST", "no").unwrap());
        assert!(parse_bool("TEST", "maybe").is_err());
    }

    #[test]
    fn cors_origins_parse_wildcard_and_lists() {
        assert_eq!(parse_cors_allowed_origins("*"), vec!["*".to_string()]);
        assert_eq!(
            parse_cors_allowed_origins("https://a.example, https://b.example"),
            vec!["https://a.example".to_string(), "https://b.example".to_string()]
        );
        assert!(parse_cors_allowed_origins("  ").is_empty());
    }

    #[test]
    fn jwt_debug_redacts_secret() {
        let jwt = JwtConfig {
            hs256_secret: Some("super-secret".to_string()),
            ..JwtConfig::default()
        };
        let dbg = format!("{jwt:?}");
        assert!(dbg.contains("REDACTED"));
        assert!(!dbg.contains("super-secret"));
    }

    #[test]
    fn orchestration_durations_convert() {
        let orchestration = OrchestrationConfig {
            sync_wait_ms: 1500,
            claim_ttl_ms: 3000,
            ..OrchestrationConfig::default()
        };
        assert_eq!(orchestration.sync_wait().as_millis(), 1500);
        assert_eq!(orchestration.claim_ttl().as_millis(), 3000);
    }
}
