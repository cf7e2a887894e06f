//! Cache lifetime policy for metadata records.

/// Lifetime used when a record carries no usable expiry.
pub const DEFAULT_TTL_SECS: u64 = 300;
/// Lower bound: hot keys close to expiry still avoid cache churn.
pub const MIN_TTL_SECS: u64 = 60;
/// Upper bound: limits staleness after an out-of-band update.
pub const MAX_TTL_SECS: u64 = 3600;
/// Lifetime of a negative (not found) entry.
pub const NEGATIVE_TTL_SECS: u64 = 30;

/// Derive the cache lifetime of a positive entry from the record's retention expiry.
///
/// Non-positive expiry values are treated as absent. The result always lies in
/// `[MIN_TTL_SECS, MAX_TTL_SECS]`.
pub fn derive_cache_ttl(expires_at: Option<i64>, now: i64) -> u64 {
    match expires_at {
        Some(expiry) if expiry > 0 => {
            let remaining = expiry.saturating_sub(now);
            remaining.clamp(MIN_TTL_SECS as i64, MAX_TTL_SECS as i64) as u64
        }
        _ => DEFAULT_TTL_SECS,
    }
}
