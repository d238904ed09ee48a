//! Workload size parsing (`400`, `512M`, `2g`).

use crate::config::CliError;

const MEGA: u64 = 1_000_000;
const GIGA: u64 = 1_000_000_000;

/// Parse a byte count with an optional decimal `M`/`G` suffix.
///
/// Leading digits are the count; whatever follows (surrounding whitespace
/// ignored) must be empty, `M`/`m` or `G`/`g`.
///
/// # Errors
///
/// [`CliError::UnknownSizeSuffix`] for any other suffix,
/// [`CliError::InvalidSize`] when there are no leading digits or the value
/// overflows `u64`.
pub fn parse_size(input: &str) -> Result<u64, CliError> {
    let trimmed = input.trim();
    let digits_end = trimmed.find(|c: char| !c.is_ascii_digit()).unwrap_or(trimmed.len());
    let (digits, suffix) = trimmed.split_at(digits_end);

    if digits.is_empty() {
        return Err(CliError::InvalidSize {
            input: input.to_owned(),
            reason: "expected a byte count".into(),
        });
    }
    let count: u64 = digits.parse().map_err(|e: std::num::ParseIntError| CliError::InvalidSize {
        input: input.to_owned(),
        reason: e.to_string(),
    })?;

    let multiplier = match suffix.trim() {
        "" => 1,
        "M" | "m" => MEGA,
        "G" | "g" => GIGA,
        other => return Err(CliError::UnknownSizeSuffix { suffix: other.to_owned() }),
    };

    count.checked_mul(multiplier).ok_or_else(|| CliError::InvalidSize {
        input: input.to_owned(),
        reason: "value does not fit in 64 bits".into(),
    })
}
