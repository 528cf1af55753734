//! Byte sizes written the way operators write them: `512`, `64K`, `10MB`, `1G`.

/// Errors from [`parse_size`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SizeError {
    #[error("size must not be empty")]
    Empty,

    #[error("invalid size {0:?}")]
    Invalid(String),

    #[error("size {0:?} overflows 64 bits")]
    Overflow(String),
}

/// Parse a size with an optional binary unit suffix (`K`, `M`, `G`, `T`, `P`,
/// each optionally followed by `B`). Case-insensitive.
pub fn parse_size(s: &str) -> Result<u64, SizeError> {
    let trimmed = s.trim();
    if trimmed.is_empty() {
        return Err(SizeError::Empty);
    }
    let upper = trimmed.to_ascii_uppercase();
    let without_b = upper.strip_suffix('B').unwrap_or(&upper);

    let (digits, shift) = match without_b.as_bytes().last() {
        Some(b'K') => (&without_b[..without_b.len() - 1], 10),
        Some(b'M') => (&without_b[..without_b.len() - 1], 20),
        Some(b'G') => (&without_b[..without_b.len() - 1], 30),
        Some(b'T') => (&without_b[..without_b.len() - 1], 40),
        Some(b'P') => (&without_b[..without_b.len() - 1], 50),
        _ => (without_b, 0),
    };

    let value: u64 = digits
        .trim()
        .parse()
        .map_err(|_| SizeError::Invalid(s.to_string()))?;
    value
        .checked_mul(1u64 << shift)
        .ok_or_else(|| SizeError::Overflow(s.to_string()))
}

/// Render a byte count with the largest fitting unit, e.g. `1.50 MB`.
pub fn format_size(bytes: u64) -> String {
    const UNITS: [(u32, &str); 5] = [(50, "PB"), (40, "TB"), (30, "GB"), (20, "MB"), (10, "KB")];
    for (shift, unit) in UNITS {
        if bytes >= 1u64 << shift {
            return format!("{:.2} {unit}", bytes as f64 / (1u64 << shift) as f64);
        }
    }
    format!("{bytes} B")
}
