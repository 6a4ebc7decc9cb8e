//! Server configuration

use clap::Parser;

/// Configuration for the relay HTTP adapter
#[derive(Debug, Clone, Parser)]
#[command(name = "relay-server", about = "HTTP and SSE adapter over the relay runtime")]
pub struct ServerConfig {
    /// Bind address
    #[arg(long, env = "RELAY_HOST", default_value = "127.0.0.1")]
    pub host: String,

    /// Bind port
    #[arg(long, env = "RELAY_PORT", default_value_t = 8080)]
    pub port: u16,

    /// SQLite connection string shared by the state store and queue
    #[arg(long, env = "RELAY_DATABASE_URL", default_value = "sqlite:relay.db?mode=rwc")]
    pub database_url: String,

    /// Logical queue name stamped on run metadata
    #[arg(long, env = "RELAY_QUEUE", default_value = "runs")]
    pub queue_name: String,

    /// Identity of the in-process worker
    #[arg(long, env = "RELAY_WORKER_ID", default_value = "worker-1")]
    pub worker_id: String,

    /// Concurrent deliveries the in-process worker claims
    #[arg(long, env = "RELAY_WORKER_CAPACITY", default_value_t = 4)]
    pub capacity: usize,

    /// OpenAI-compatible endpoint base for agent tasks, e.g.
    /// `https://api.openai.com/v1`; agent tasks fail without one
    #[arg(long, env = "RELAY_PROVIDER_URL")]
    pub provider_url: Option<String>,

    /// Model name sent to the provider
    #[arg(long, env = "RELAY_PROVIDER_MODEL", default_value = "gpt-4o-mini")]
    pub provider_model: String,

    /// Bearer token for the provider endpoint
    #[arg(long, env = "RELAY_PROVIDER_API_KEY", hide_env_values = true)]
    pub provider_api_key: Option<String>,

    /// Directory of JSON graph definitions registered as workflows
    #[arg(long, env = "RELAY_WORKFLOWS_DIR")]
    pub workflows_dir: Option<std::path::PathBuf>,
}

impl ServerConfig {
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ServerConfig::parse_from(["relay-server"]);
        assert_eq!(config.host, "127.0.0.1");
        assert_eq!(config.port, 8080);
        assert_eq!(config.bind_address(), "127.0.0.1:8080");
        assert_eq!(config.worker_id, "worker-1");
        assert_eq!(config.capacity, 4);
        assert!(config.provider_url.is_none());
        assert!(config.workflows_dir.is_none());
    }

    #[test]
    fn test_flag_overrides() {
        let config = ServerConfig::parse_from(["relay-server", "--port", "9000", "--queue-name", "jobs"]);
        assert_eq!(config.port, 9000);
        assert_eq!(config.queue_name, "jobs");
    }
}
