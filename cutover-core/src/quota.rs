//! Disk quota settings read from container labels.

use crate::error::CoreError;

/// Label holding the quota size of the container's writable layer.
pub const DISK_QUOTA_LABEL: &str = "DiskQuota";

/// A project quota to apply to one directory tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuotaSpec {
    pub project_id: u32,
    /// Hard limit in bytes.
    pub limit_bytes: u64,
}

impl QuotaSpec {
    /// Decide the quota for a container from its quota ID and size label.
    ///
    /// An empty or non-positive ID means no quota. A positive ID with an empty
    /// size is refused rather than applied unbounded.
    ///
    /// # Errors
    ///
    /// [`CoreError::InvalidQuotaId`] for a non-numeric ID,
    /// [`CoreError::QuotaSizeMissing`] for a positive ID without a size,
    /// [`CoreError::InvalidQuotaSize`] for an unparseable size.
    pub fn resolve(quota_id: &str, size: &str) -> Result<Option<Self>, CoreError> {
        let quota_id = quota_id.trim();
        if quota_id.is_empty() {
            return Ok(None);
        }
        let id: i64 = quota_id
            .parse()
            .map_err(|_| CoreError::InvalidQuotaId { value: quota_id.to_owned() })?;
        if id <= 0 {
            return Ok(None);
        }
        let project_id = u32::try_from(id)
            .map_err(|_| CoreError::InvalidQuotaId { value: quota_id.to_owned() })?;

        let size = size.trim();
        if size.is_empty() {
            return Err(CoreError::QuotaSizeMissing { quota_id: project_id });
        }
        Ok(Some(Self { project_id, limit_bytes: parse_size(size)? }))
    }

    /// Limit rounded up to whole KiB, as the quota tools expect.
    #[must_use]
    pub fn limit_kib(&self) -> u64 {
        self.limit_bytes.div_ceil(1024)
    }
}

/// Parse `1024`, `10k`, `20M`, `3gb`, `1Ti` and similar into bytes.
///
/// # Errors
///
/// Returns [`CoreError::InvalidQuotaSize`] if the string is not a number with
/// an optional `k/m/g/t` suffix (optionally followed by `b` or `i`).
pub fn parse_size(value: &str) -> Result<u64, CoreError> {
    let invalid = || CoreError::InvalidQuotaSize { value: value.to_owned() };

    let lower = value.trim().to_ascii_lowercase();
    let unit_start = lower.find(|c: char| !c.is_ascii_digit()).unwrap_or(lower.len());
    let (digits, unit) = lower.split_at(unit_start);
    if digits.is_empty() {
        return Err(invalid());
    }
    let number: u64 = digits.parse().map_err(|_| invalid())?;

    let shift = match unit {
        "" | "b" => 0,
        "k" | "kb" | "ki" => 10,
        "m" | "mb" | "mi" => 20,
        "g" | "gb" | "gi" => 30,
        "t" | "tb" | "ti" => 40,
        _ => return Err(invalid()),
    };
    number.checked_mul(1u64 << shift).ok_or_else(invalid)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_id_means_no_quota() {
        assert!(matches!(QuotaSpec::resolve("", "10g"), Ok(None)));
        assert!(matches!(QuotaSpec::resolve("0", "10g"), Ok(None)));
        assert!(matches!(QuotaSpec::resolve("-1", ""), Ok(None)));
    }

    #[test]
    fn positive_id_without_size_fails_closed() {
        match QuotaSpec::resolve("16777216", "") {
            Err(CoreError::QuotaSizeMissing { quota_id }) => assert_eq!(quota_id, 16_777_216),
            other => panic!("expected QuotaSizeMissing, got {other:?}"),
        }
    }

    #[test]
    fn non_numeric_id_is_rejected() {
        assert!(matches!(
            QuotaSpec::resolve("abc", "10g"),
            Err(CoreError::InvalidQuotaId { .. })
        ));
    }

    #[test]
    fn resolve_parses_size() {
        let spec = match QuotaSpec::resolve("100", "2g") {
            Ok(Some(s)) => s,
            other => panic!("expected a quota, got {other:?}"),
        };
        assert_eq!(spec.project_id, 100);
        assert_eq!(spec.limit_bytes, 2 << 30);
        assert_eq!(spec.limit_kib(), 2 << 20);
    }

    #[test]
    fn parse_size_units() {
        assert_eq!(parse_size("512").ok(), Some(512));
        assert_eq!(parse_size("1k").ok(), Some(1024));
        assert_eq!(parse_size("10MB").ok(), Some(10 << 20));
        assert_eq!(parse_size("3Gi").ok(), Some(3 << 30));
        assert_eq!(parse_size("1t").ok(), Some(1 << 40));
        assert!(parse_size("").is_err());
        assert!(parse_size("g").is_err());
        assert!(parse_size("10x").is_err());
        assert!(parse_size("1.5g").is_err());
        assert!(parse_size("99999999999t").is_err());
    }

    #[test]
    fn limit_kib_rounds_up() {
        let spec = QuotaSpec { project_id: 1, limit_bytes: 1025 };
        assert_eq!(spec.limit_kib(), 2);
    }
}
