use serde::Deserialize;
use std::env;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub server: ServerConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    pub redis: Option<RedisConfig>,
    pub auth: AuthConfig,
    pub business_rules: BusinessRules,
    pub gateway: GatewayConfig,
    pub smtp: Option<SmtpConfig>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct BusinessRules {
    pub price_per_ticket: i64,
    #[serde(default = "default_max_numbers")]
    pub max_numbers_per_purchase: usize,
    /// Unpaid claims older than this are released. 0 disables the reaper.
    #[serde(default = "default_claim_ttl")]
    pub claim_ttl_seconds: u64,
    #[serde(default = "default_reaper_interval")]
    pub reaper_interval_seconds: u64,
    /// Delay before the single re-lookup of a claim an approved payment refers to.
    #[serde(default = "default_claim_lookup_retry")]
    pub claim_lookup_retry_ms: u64,
    #[serde(default = "default_currency")]
    pub currency: String,
    #[serde(default = "default_raffle_name")]
    pub raffle_name: String,
    pub base_url: String,
}

fn default_max_numbers() -> usize { 20 }
fn default_claim_ttl() -> u64 { 1800 }
fn default_reaper_interval() -> u64 { 60 }
fn default_claim_lookup_retry() -> u64 { 2000 }
fn default_currency() -> String { "COP".to_string() }
fn default_raffle_name() -> String { "Rifa".to_string() }

#[derive(Debug, Deserialize, Clone)]
pub struct AuthConfig {
    pub jwt_secret: String,
    pub jwt_expiration_seconds: u64,
    pub admin_user: String,
    pub admin_password: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub port: u16,
    #[serde(default)]
    pub allowed_origins: Vec<String>,
}

/// Without a url the service runs on the in-memory store (development only).
#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    pub url: Option<String>,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_max_connections() -> u32 { 5 }

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self { url: None, max_connections: default_max_connections() }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct RedisConfig {
    pub url: String,
    #[serde(default = "default_rate_limit")]
    pub rate_limit_per_minute: i64,
}

fn default_rate_limit() -> i64 { 100 }

#[derive(Debug, Deserialize, Clone)]
pub struct GatewayConfig {
    pub access_token: String,
    #[serde(default = "default_api_base")]
    pub api_base: String,
    /// Signing secret for webhook notifications; verification is skipped when absent.
    pub webhook_secret: Option<String>,
    #[serde(default = "default_gateway_timeout")]
    pub timeout_seconds: u64,
}

fn default_api_base() -> String { "https://api.mercadopago.com".to_string() }
fn default_gateway_timeout() -> u64 { 10 }

#[derive(Debug, Deserialize, Clone)]
pub struct SmtpConfig {
    pub host: String,
    #[serde(default = "default_smtp_port")]
    pub port: u16,
    pub username: String,
    pub password: String,
    pub from_email: String,
    pub from_name: String,
}

fn default_smtp_port() -> u16 { 465 }

/// Placeholder shipped in `config/default.toml` for every secret.
pub const PLACEHOLDER_SECRET: &str = "change-me";

impl Config {
    /// Secrets still empty or at the shipped placeholder.
    pub fn placeholder_secrets(&self) -> Vec<&'static str> {
        let unset = |value: &str| value.trim().is_empty() || value == PLACEHOLDER_SECRET;
        let mut found = Vec::new();
        if unset(&self.auth.jwt_secret) {
            found.push("auth.jwt_secret");
        }
        if unset(&self.auth.admin_password) {
            found.push("auth.admin_password");
        }
        found
    }

    pub fn load() -> Result<Self, config::ConfigError> {
        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let s = config::Config::builder()
            .add_source(config::File::with_name("config/default"))
            // Per-environment overrides, optional
            .add_source(config::File::with_name(&format!("config/{}", run_mode)).required(false))
            // Local, uncommitted overrides
            .add_source(config::File::with_name("config/local").required(false))
            // RIFA__GATEWAY__ACCESS_TOKEN=... sets gateway.access_token
            .add_source(config::Environment::with_prefix("RIFA").separator("__"))
            .build()?;

        s.try_deserialize()
    }
}
