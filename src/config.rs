//! Configuration
//!
//! CLI arguments and environment variable handling using clap. Only the
//! connection endpoints, timeouts and validation limits live here; the
//! embedding service wires everything else.

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use crate::validate::ValidationLimits;

/// Coinboard - dual-store social action coordinator
#[derive(Parser, Debug, Clone)]
#[command(name = "coinboard")]
#[command(about = "Dual-store social action coordinator for a cryptocurrency community forum")]
pub struct Args {
    /// MongoDB connection URI for the document backend
    #[arg(long, env = "MONGODB_URI", default_value = "mongodb://localhost:27017")]
    pub mongodb_uri: String,

    /// MongoDB database name
    #[arg(long, env = "MONGODB_DB", default_value = "coinboard")]
    pub mongodb_db: String,

    /// SQLite database path for the relational backend
    #[arg(long, env = "SQLITE_PATH", default_value = "coinboard.db")]
    pub sqlite_path: PathBuf,

    /// Per-store call timeout in milliseconds; a slower store degrades to
    /// a store failure for that call
    #[arg(long, env = "STORE_TIMEOUT_MS", default_value = "3000")]
    pub store_timeout_ms: u64,

    /// Maximum topic title length in characters
    #[arg(long, env = "MAX_TITLE_CHARS", default_value = "50")]
    pub max_title_chars: usize,

    /// Maximum topic/comment content length in characters
    #[arg(long, env = "MAX_CONTENT_CHARS", default_value = "10000")]
    pub max_content_chars: usize,

    /// Comma-separated list of words rejected in titles and content
    #[arg(long, env = "FORBIDDEN_WORDS", value_delimiter = ',')]
    pub forbidden_words: Vec<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,
}

impl Args {
    pub fn store_timeout(&self) -> Duration {
        Duration::from_millis(self.store_timeout_ms)
    }

    pub fn validation_limits(&self) -> ValidationLimits {
        ValidationLimits {
            max_title_chars: self.max_title_chars,
            max_content_chars: self.max_content_chars,
            forbidden_words: self.forbidden_words.clone(),
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.store_timeout_ms == 0 {
            return Err("STORE_TIMEOUT_MS must be positive".to_string());
        }
        if self.max_title_chars == 0 {
            return Err("MAX_TITLE_CHARS must be positive".to_string());
        }
        if self.max_content_chars < self.max_title_chars {
            return Err("MAX_CONTENT_CHARS must be at least MAX_TITLE_CHARS".to_string());
        }
        Ok(())
    }
}

/// Install the global tracing subscriber; `RUST_LOG` wins over the
/// configured level. Safe to call more than once.
pub fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_parse_and_validate() {
        let args = Args::try_parse_from(["coinboard"]).unwrap();
        assert_eq!(args.store_timeout(), Duration::from_secs(3));
        assert_eq!(args.max_title_chars, 50);
        assert!(args.validate().is_ok());
    }

    #[test]
    fn zero_timeout_rejected() {
        let args = Args::try_parse_from(["coinboard", "--store-timeout-ms", "0"]).unwrap();
        assert!(args.validate().is_err());
    }

    #[test]
    fn forbidden_words_split_on_commas() {
        let args =
            Args::try_parse_from(["coinboard", "--forbidden-words", "scam,rugpull"]).unwrap();
        let limits = args.validation_limits();
        assert_eq!(limits.forbidden_words, vec!["scam", "rugpull"]);
    }
}
