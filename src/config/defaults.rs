//! Default constants for reconstruction runs.

// =============================================================================
// Partitioning Defaults
// =============================================================================

/// Default number of partitions when not specified.
/// Uses the number of CPU cores so every worker has a shard.
pub fn default_partition_count() -> usize {
    std::thread::available_parallelism()
        .map(|p| p.get())
        .unwrap_or(8)
}

// =============================================================================
// Diagnostics Defaults
// =============================================================================

/// Diagnostics are collected unless disabled.
pub const DEFAULT_DIAGNOSTICS_ENABLED: bool = true;

/// Maximum bytes of raw record text kept per diagnostic row.
/// Large page or block payloads are truncated on a character boundary.
pub const DEFAULT_MAX_RAW_LEN: usize = 4096;

// =============================================================================
// Environment
// =============================================================================

/// Prefix for environment overrides, e.g. `CHRONORUST_PARTITION_COUNT`.
pub const ENV_PREFIX: &str = "CHRONORUST_";

/// Separator for nested keys, e.g. `CHRONORUST_DIAGNOSTICS__MAX_RAW_LEN`.
pub const ENV_NESTING_SEPARATOR: &str = "__";
