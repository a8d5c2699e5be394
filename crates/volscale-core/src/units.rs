//! Size-unit arithmetic.
//!
//! Volume records keep exact bytes; the provider speaks whole GiB.
//! Conversions toward the provider always round up so a requested
//! increment is never silently shrunk.

/// One gibibyte in bytes.
pub const GIB: u64 = 1024 * 1024 * 1024;

/// Convert whole GiB to bytes.
pub fn gib_to_bytes(gib: u64) -> u64 {
    gib * GIB
}

/// Convert bytes to GiB, rounding up to provider granularity.
pub fn bytes_to_gib_ceil(bytes: u64) -> u64 {
    bytes.div_ceil(GIB)
}

/// Bytes as fractional GiB, for display only.
pub fn bytes_as_gib(bytes: u64) -> f64 {
    bytes as f64 / GIB as f64
}

/// Human-readable GiB string with two decimals.
pub fn format_gib(bytes: u64) -> String {
    format!("{:.2}GiB", bytes_as_gib(bytes))
}
