use anyhow::Context;
use dotenvy::dotenv;
use std::env;
use std::str::FromStr;
use std::time::Duration as StdDuration;
use url::Url;

use crate::gateway::RetryPolicy;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GatewayMode {
    /// Real CircoFlows API over HTTPS, Postgres-backed store.
    Live,
    /// Deterministic in-process gateway and in-memory store. No network,
    /// no database.
    Sandbox,
}

impl FromStr for GatewayMode {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_ascii_lowercase().as_str() {
            "live" => Ok(GatewayMode::Live),
            "sandbox" => Ok(GatewayMode::Sandbox),
            other => anyhow::bail!("GATEWAY_MODE must be 'live' or 'sandbox', got '{}'", other),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub server_port: u16,
    pub database_url: Option<String>,
    pub gateway_mode: GatewayMode,
    pub gateway_api_url: String,
    pub gateway_api_key: String,
    pub gateway_webhook_secret: String,
    pub gateway_max_retries: u32,
    pub gateway_timeout_secs: u64,
    pub three_ds_ttl_secs: i64,
    pub reconcile_interval_secs: u64,
    pub reconcile_stuck_after_secs: i64,
    /// Six-field cron expression, UTC.
    pub settlement_schedule: String,
    pub cors_allowed_origins: String,
    /// Public base URL, used to derive webhook and 3DS return URLs.
    pub app_url: Option<String>,
    pub fee_schedule_json: Option<String>,
    pub merchant_directory_json: Option<String>,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenv().ok(); // Load .env file if present

        let gateway_mode: GatewayMode = env::var("GATEWAY_MODE")
            .unwrap_or_else(|_| "sandbox".to_string())
            .parse()?;

        let config = Config {
            server_port: env::var("SERVER_PORT")
                .unwrap_or_else(|_| "3000".to_string())
                .parse()
                .context("SERVER_PORT must be a port number")?,
            database_url: env::var("DATABASE_URL").ok(),
            gateway_mode,
            gateway_api_url: env::var("GATEWAY_API_URL")
                .unwrap_or_else(|_| "https://api.circoflows.com".to_string()),
            gateway_api_key: env::var("GATEWAY_API_KEY").unwrap_or_default(),
            gateway_webhook_secret: env::var("GATEWAY_WEBHOOK_SECRET").unwrap_or_else(|_| {
                match gateway_mode {
                    GatewayMode::Sandbox => "sandbox-webhook-secret".to_string(),
                    GatewayMode::Live => String::new(),
                }
            }),
            gateway_max_retries: env::var("GATEWAY_MAX_RETRIES")
                .unwrap_or_else(|_| "3".to_string())
                .parse()
                .context("GATEWAY_MAX_RETRIES must be an integer")?,
            gateway_timeout_secs: env::var("GATEWAY_TIMEOUT_SECS")
                .unwrap_or_else(|_| "30".to_string())
                .parse()
                .context("GATEWAY_TIMEOUT_SECS must be an integer")?,
            three_ds_ttl_secs: env::var("THREEDS_TTL_SECS")
                .unwrap_or_else(|_| "900".to_string())
                .parse()
                .context("THREEDS_TTL_SECS must be an integer")?,
            reconcile_interval_secs: env::var("RECONCILE_INTERVAL_SECS")
                .unwrap_or_else(|_| "60".to_string())
                .parse()
                .context("RECONCILE_INTERVAL_SECS must be an integer")?,
            reconcile_stuck_after_secs: env::var("RECONCILE_STUCK_AFTER_SECS")
                .unwrap_or_else(|_| "1800".to_string())
                .parse()
                .context("RECONCILE_STUCK_AFTER_SECS must be an integer")?,
            settlement_schedule: env::var("SETTLEMENT_SCHEDULE")
                .unwrap_or_else(|_| "0 5 0 * * *".to_string()),
            cors_allowed_origins: env::var("CORS_ALLOWED_ORIGINS")
                .unwrap_or_else(|_| "*".to_string()),
            app_url: env::var("APP_URL").ok(),
            fee_schedule_json: env::var("FEE_SCHEDULE_JSON").ok(),
            merchant_directory_json: env::var("MERCHANT_DIRECTORY_JSON").ok(),
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> anyhow::Result<()> {
        if self.gateway_mode == GatewayMode::Live {
            if self.database_url.is_none() {
                anyhow::bail!("DATABASE_URL is required when GATEWAY_MODE=live");
            }
            if self.gateway_api_key.is_empty() {
                anyhow::bail!("GATEWAY_API_KEY is required when GATEWAY_MODE=live");
            }
            if self.gateway_webhook_secret.is_empty() {
                anyhow::bail!("GATEWAY_WEBHOOK_SECRET is required when GATEWAY_MODE=live");
            }
            Url::parse(&self.gateway_api_url)
                .context("GATEWAY_API_URL is not a valid URL")?;
        }
        if let Some(app_url) = &self.app_url {
            Url::parse(app_url).context("APP_URL is not a valid URL")?;
        }
        self.settlement_schedule()?;
        Ok(())
    }

    pub fn settlement_schedule(&self) -> anyhow::Result<cron::Schedule> {
        cron::Schedule::from_str(&self.settlement_schedule).with_context(|| {
            format!(
                "SETTLEMENT_SCHEDULE '{}' is not a valid cron expression",
                self.settlement_schedule
            )
        })
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.gateway_max_retries,
            StdDuration::from_millis(200),
        )
    }

    pub fn three_ds_ttl(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.three_ds_ttl_secs)
    }

    pub fn reconcile_interval(&self) -> StdDuration {
        StdDuration::from_secs(self.reconcile_interval_secs)
    }

    pub fn reconcile_stuck_after(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.reconcile_stuck_after_secs)
    }

    pub fn gateway_timeout(&self) -> StdDuration {
        StdDuration::from_secs(self.gateway_timeout_secs)
    }
}
