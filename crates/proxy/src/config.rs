use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ProxyConfig {
    pub server: ServerConfig,
    pub docker: DockerConfig,
    pub storage: StorageConfig,
    #[serde(default)]
    pub collector: CollectorConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    pub bind_address: String,
    /// Upper bound on draining open responses after a shutdown signal.
    pub shutdown_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DockerConfig {
    /// Engine socket. Empty uses `DOCKER_HOST` or the platform default.
    pub socket: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StorageConfig {
    pub log_dir: String,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct CollectorConfig {
    /// Container names to capture; empty captures every container.
    #[serde(default)]
    pub containers: Vec<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Json,
    Pretty,
}

const CONFIG_PATHS: &[&str] = &["/etc/logproxy/proxy", "config/proxy"];

impl ProxyConfig {
    /// Load configuration from proxy.toml and environment variables
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();
        Self::load_from(CONFIG_PATHS)
    }

    fn load_from(paths: &[&str]) -> Result<Self> {
        Self::load_with_env(paths, environment())
    }

    /// Defaults, then each optional file in order, then `LOGPROXY_*`
    /// variables (`LOGPROXY_SERVER__BIND_ADDRESS`, comma-separated
    /// `LOGPROXY_COLLECTOR__CONTAINERS`).
    fn load_with_env(paths: &[&str], env: config::Environment) -> Result<Self> {
        let defaults = config::Config::try_from(&ProxyConfig::default())
            .context("Failed to serialize default configuration")?;

        let mut builder = config::Config::builder().add_source(defaults);
        for path in paths {
            builder = builder.add_source(config::File::with_name(path).required(false));
        }
        builder = builder.add_source(env);

        builder
            .build()
            .context("Failed to build configuration")?
            .try_deserialize()
            .context("Failed to deserialize configuration")
    }

    pub fn validate(&self) -> Result<()> {
        self.server
            .bind_address
            .parse::<std::net::SocketAddr>()
            .context("Invalid bind_address")?;

        if self.storage.log_dir.trim().is_empty() {
            anyhow::bail!("storage.log_dir must not be empty");
        }

        if self.collector.containers.iter().any(|name| name.trim().is_empty()) {
            anyhow::bail!("collector.containers must not contain blank names");
        }

        Ok(())
    }
}

fn environment() -> config::Environment {
    config::Environment::with_prefix("LOGPROXY")
        .prefix_separator("_")
        .separator("__")
        .try_parsing(true)
        .list_separator(",")
        .with_list_parse_key("collector.containers")
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                bind_address: "0.0.0.0:8000".to_string(),
                shutdown_timeout_secs: 15,
            },
            docker: DockerConfig {
                socket: String::new(),
            },
            storage: StorageConfig {
                log_dir: "logs".to_string(),
            },
            collector: CollectorConfig {
                containers: Vec::new(),
            },
            logging: LoggingConfig {
                level: "info".to_string(),
                format: LogFormat::Pretty,
            },
        }
    }
}
