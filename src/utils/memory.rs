//! Memory-size string parsing

use crate::error::{SandboxError, SandboxResult};

/// Parse a human memory-size string into bytes.
///
/// Accepts a bare byte count or a value suffixed with `k`, `m`, or `g`
/// (optionally followed by `b`), case-insensitive: `512m` = 512 MiB,
/// `1g` = 1 GiB, `1024` = 1024 bytes.
pub fn parse_memory(input: &str) -> SandboxResult<u64> {
    let s = input.trim().to_ascii_lowercase();
    if s.is_empty() {
        return Err(SandboxError::BadRequest(
            "empty memory size string".to_string(),
        ));
    }

    let digits_end = s
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(s.len());
    let (digits, suffix) = s.split_at(digits_end);

    let value: u64 = digits
        .parse()
        .map_err(|_| SandboxError::BadRequest(format!("invalid memory size: {input:?}")))?;

    let multiplier: u64 = match suffix {
        "" => 1,
        "k" | "kb" => 1024,
        "m" | "mb" => 1024 * 1024,
        "g" | "gb" => 1024 * 1024 * 1024,
        _ => {
            return Err(SandboxError::BadRequest(format!(
                "invalid memory size: {input:?}"
            )));
        }
    };

    value
        .checked_mul(multiplier)
        .ok_or_else(|| SandboxError::BadRequest(format!("memory size overflows: {input:?}")))
}
