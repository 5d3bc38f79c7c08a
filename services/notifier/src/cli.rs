use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use sync_engine::EngineConfig;
use types::stream::StreamKind;

#[derive(Parser, Debug, Clone)]
#[command(name = "notifier")]
#[command(version, about = "Headless DishHub staff station", long_about = None)]
pub struct Args {
    /// REST API base URL (e.g. https://api.example.com/api)
    #[arg(long, env = "DISHHUB_BASE_URL")]
    pub base_url: String,

    /// Hub base URL; without it the station relies on polling alone
    #[arg(long, env = "DISHHUB_HUB_URL")]
    pub hub_url: Option<String>,

    #[arg(long, env = "DISHHUB_RESTAURANT_ID")]
    pub restaurant_id: u64,

    /// Bearer token for both the hub and the REST API
    #[arg(long, env = "DISHHUB_TOKEN", hide_env_values = true)]
    pub token: Option<String>,

    /// Directory holding one cache file per stream
    #[arg(long, default_value = ".dishhub")]
    pub cache_dir: PathBuf,

    /// Poll fallback interval (0 disables polling)
    #[arg(long, default_value_t = 15_000)]
    pub poll_interval_ms: u64,

    /// Consecutive push failures before the channel is reported as failed
    #[arg(long, default_value_t = 5)]
    pub max_connect_failures: u32,

    /// Streams to follow
    #[arg(long, value_delimiter = ',', default_value = "requests,orders")]
    pub streams: Vec<StreamKind>,

    /// Log level when RUST_LOG is unset (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    pub log_level: String,
}

impl Args {
    pub fn follows(&self, kind: StreamKind) -> bool {
        self.streams.contains(&kind)
    }

    /// Engine tuning derived from the flags.
    pub fn engine_config(&self) -> EngineConfig {
        let mut config = EngineConfig::default();
        config.polling.enabled = self.poll_interval_ms > 0;
        if self.poll_interval_ms > 0 {
            config.polling.interval = Duration::from_millis(self.poll_interval_ms);
        }
        config.connection.max_consecutive_failures = self.max_connect_failures.max(1);
        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let args =
            Args::try_parse_from(["notifier", "--base-url", "http://localhost/api", "--restaurant-id", "7"])
                .unwrap();

        assert_eq!(args.restaurant_id, 7);
        assert!(args.follows(StreamKind::Request));
        assert!(args.follows(StreamKind::Order));

        let config = args.engine_config();
        assert!(config.polling.enabled);
        assert_eq!(config.polling.interval, Duration::from_secs(15));
        assert_eq!(config.connection.max_consecutive_failures, 5);
    }

    #[test]
    fn test_single_stream_and_polling_disabled() {
        let args = Args::try_parse_from([
            "notifier",
            "--base-url",
            "http://localhost/api",
            "--restaurant-id",
            "7",
            "--streams",
            "orders",
            "--poll-interval-ms",
            "0",
        ])
        .unwrap();

        assert!(!args.follows(StreamKind::Request));
        assert!(args.follows(StreamKind::Order));
        assert!(!args.engine_config().polling.enabled);
    }

    #[test]
    fn test_unknown_stream_rejected() {
        let result = Args::try_parse_from([
            "notifier",
            "--base-url",
            "http://localhost/api",
            "--restaurant-id",
            "7",
            "--streams",
            "payments",
        ]);
        assert!(result.is_err());
    }
}
