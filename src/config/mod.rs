//! Process configuration, read from the environment once at startup.

use anyhow::Context;
use std::env;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub sla: SlaSettings,
    pub escalation_webhook: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone)]
pub struct SlaSettings {
    /// TOML policy file; the built-in table applies when unset.
    pub policy_path: Option<String>,
    pub sweep_interval_secs: u64,
    pub sweep_batch_size: usize,
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let host = env::var("SERVER_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
        let port = match env::var("SERVER_PORT") {
            Ok(raw) => raw
                .parse::<u16>()
                .with_context(|| format!("SERVER_PORT `{raw}` is not a port"))?,
            Err(_) => 8080,
        };

        let sweep_interval_secs = match env::var("SLA_SWEEP_INTERVAL_SECS") {
            Ok(raw) => {
                let secs = raw
                    .parse::<u64>()
                    .with_context(|| format!("SLA_SWEEP_INTERVAL_SECS `{raw}` is not seconds"))?;
                anyhow::ensure!(secs > 0, "SLA_SWEEP_INTERVAL_SECS must be positive");
                secs
            }
            Err(_) => 60,
        };
        let sweep_batch_size = match env::var("SLA_SWEEP_BATCH_SIZE") {
            Ok(raw) => {
                let size = raw
                    .parse::<usize>()
                    .with_context(|| format!("SLA_SWEEP_BATCH_SIZE `{raw}` is not a count"))?;
                anyhow::ensure!(size > 0, "SLA_SWEEP_BATCH_SIZE must be positive");
                size
            }
            Err(_) => 64,
        };

        Ok(Self {
            server: ServerConfig { host, port },
            sla: SlaSettings {
                policy_path: env::var("SLA_POLICY_PATH").ok(),
                sweep_interval_secs,
                sweep_batch_size,
            },
            escalation_webhook: env::var("ESCALATION_WEBHOOK_URL").ok(),
        })
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}
