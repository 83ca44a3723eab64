//! SPEC identifiers (`SPEC-ISSUE-<n>`).

use std::sync::LazyLock;

use regex::Regex;

use crate::error::{FlowError, Result};

static SPEC_ID_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^SPEC-ISSUE-([0-9]+)$").unwrap());

/// Validate a SPEC id and return the issue number it encodes.
///
/// The number must be a positive integer; `SPEC-ISSUE-0` is rejected.
pub fn parse_spec_id(spec_id: &str) -> Result<u64> {
    let invalid = || FlowError::InvalidSpecId(spec_id.to_string());
    let caps = SPEC_ID_RE.captures(spec_id).ok_or_else(invalid)?;
    let number: u64 = caps[1].parse().map_err(|_| invalid())?;
    if number == 0 {
        return Err(invalid());
    }
    Ok(number)
}

pub fn is_valid_spec_id(spec_id: &str) -> bool {
    parse_spec_id(spec_id).is_ok()
}
