//! Process-wide configuration, read once at startup.
//!
//! Values are sourced from the environment; negative numeric inputs are
//! coerced to their absolute value rather than rejected, per the service
//! contract.

use std::env;

/// Immutable configuration struct, built once in `main` and handed down
/// by reference (or `Arc`) to every component that needs it.
#[derive(Debug, Clone)]
pub struct Config {
    pub graph_db_url: String,
    pub graph_db_user: String,
    pub graph_db_password: String,
    pub graph_db_name: String,

    pub listen_host: String,
    pub listen_port: u16,

    /// Root allocator cap, in bytes. `None` means unbounded.
    pub max_mem_global: Option<usize>,
    /// Per-stream allocator cap, in bytes.
    pub max_mem_stream: usize,
    /// Rows per column chunk / wire record batch (`B`).
    pub arrow_batch_size: usize,
    /// Upstream driver pull size.
    pub bolt_fetch_size: usize,
    /// Fixed arity of the partitioned builder pool (`P`).
    pub arrow_max_partitions: usize,
    /// Bound on the final flush-pipeline drain wait.
    pub flush_drain_timeout_secs: u64,
}

const DEFAULT_MAX_MEM_STREAM: usize = i32::MAX as usize; // 2^31 - 1
const DEFAULT_ARROW_BATCH_SIZE: usize = 25_000;
const DEFAULT_BOLT_FETCH_SIZE: usize = 1_000;
const DEFAULT_ARROW_MAX_PARTITIONS: usize = 4;
const DEFAULT_FLUSH_DRAIN_TIMEOUT_SECS: u64 = 300;

impl Config {
    /// Reads configuration from the process environment, applying the
    /// documented defaults and non-negative coercion.
    pub fn from_env() -> Self {
        Config {
            graph_db_url: env_string("GRAPH_DB_URL", "bolt://localhost:7687"),
            graph_db_user: env_string("GRAPH_DB_USER", "neo4j"),
            graph_db_password: env_string("GRAPH_DB_PASSWORD", ""),
            graph_db_name: env_string("GRAPH_DB_NAME", "neo4j"),

            listen_host: env_string("LISTEN_HOST", "0.0.0.0"),
            listen_port: env_parse_unsigned("LISTEN_PORT", 8491) as u16,

            max_mem_global: env::var("MAX_MEM_GLOBAL")
                .ok()
                .and_then(|v| v.parse::<i64>().ok())
                .map(|v| v.unsigned_abs() as usize),
            max_mem_stream: env_parse_unsigned("MAX_MEM_STREAM", DEFAULT_MAX_MEM_STREAM as i64),
            arrow_batch_size: env_parse_unsigned(
                "ARROW_BATCH_SIZE",
                DEFAULT_ARROW_BATCH_SIZE as i64,
            ),
            bolt_fetch_size: env_parse_unsigned("BOLT_FETCH_SIZE", DEFAULT_BOLT_FETCH_SIZE as i64),
            arrow_max_partitions: env_parse_unsigned(
                "ARROW_MAX_PARTITIONS",
                DEFAULT_ARROW_MAX_PARTITIONS as i64,
            ),
            flush_drain_timeout_secs: env_parse_unsigned(
                "FLUSH_DRAIN_TIMEOUT_SECS",
                DEFAULT_FLUSH_DRAIN_TIMEOUT_SECS as i64,
            ) as u64,
        }
    }
}

fn env_string(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

/// Parses an env var as a signed integer then takes its absolute value,
/// so a user-supplied negative number never produces a negative budget.
fn env_parse_unsigned(key: &str, default: i64) -> usize {
    let raw = env::var(key)
        .ok()
        .and_then(|v| v.parse::<i64>().ok())
        .unwrap_or(default);
    raw.unsigned_abs() as usize
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn negative_values_are_coerced_to_absolute() {
        std::env::set_var("ARROW_BATCH_SIZE", "-42");
        let cfg = Config::from_env();
        assert_eq!(cfg.arrow_batch_size, 42);
        std::env::remove_var("ARROW_BATCH_SIZE");
    }

    #[test]
    fn defaults_apply_when_unset() {
        std::env::remove_var("ARROW_MAX_PARTITIONS");
        let cfg = Config::from_env();
        assert_eq!(cfg.arrow_max_partitions, DEFAULT_ARROW_MAX_PARTITIONS);
    }
}
