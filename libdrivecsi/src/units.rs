//! Parsing of human-readable byte sizes (`"10Gi"`, `"512M"`, `"4096"`).

use crate::error::CsiError;

const KIB: u64 = 1 << 10;

/// Parse a decimal byte count with an optional binary suffix.
///
/// Accepted suffixes are `K`, `M`, `G` and `T` (case-insensitive), each
/// optionally followed by `i` or `B`. All suffixes are powers of 1024.
pub fn parse_bytes(input: &str) -> Result<u64, CsiError> {
    let s = input.trim();
    let split = s
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(s.len());
    let (digits, suffix) = s.split_at(split);
    if digits.is_empty() {
        return Err(CsiError::InvalidArgument(format!(
            "size {input:?} has no numeric part"
        )));
    }
    let value: u64 = digits
        .parse()
        .map_err(|e| CsiError::InvalidArgument(format!("size {input:?}: {e}")))?;

    let multiplier = match suffix.to_ascii_uppercase().as_str() {
        "" | "B" => 1,
        "K" | "KI" | "KB" => KIB,
        "M" | "MI" | "MB" => KIB.pow(2),
        "G" | "GI" | "GB" => KIB.pow(3),
        "T" | "TI" | "TB" => KIB.pow(4),
        other => {
            return Err(CsiError::InvalidArgument(format!(
                "size {input:?}: unknown suffix {other:?}"
            )));
        }
    };

    value
        .checked_mul(multiplier)
        .ok_or_else(|| CsiError::InvalidArgument(format!("size {input:?} overflows")))
}
