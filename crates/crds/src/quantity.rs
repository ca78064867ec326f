//! Kubernetes resource quantity validation.
//!
//! Accepts the serialized quantity grammar used by the API server
//! (`<number><suffix>`, e.g. `250m`, `1.5`, `512Mi`, `1e3`) and rejects
//! negative values, since requests and limits can never be negative.

use thiserror::Error;

const BINARY_SI: [&str; 6] = ["Ki", "Mi", "Gi", "Ti", "Pi", "Ei"];
const DECIMAL_SI: [&str; 10] = ["n", "u", "m", "", "k", "M", "G", "T", "P", "E"];

/// Reasons a quantity string is rejected.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum QuantityError {
    /// Empty string
    #[error("quantity is empty")]
    Empty,

    /// Leading minus sign
    #[error("quantity {0:?} is negative")]
    Negative(String),

    /// No digits in the numeric part
    #[error("quantity {0:?} has no numeric value")]
    InvalidNumber(String),

    /// Suffix is neither SI, binary SI, nor a decimal exponent
    #[error("quantity {value:?} has unknown suffix {suffix:?}")]
    UnknownSuffix {
        /// Full quantity string
        value: String,
        /// Offending suffix
        suffix: String,
    },
}

/// Validates a quantity string such as `500m` or `256Mi`.
pub fn validate(value: &str) -> Result<(), QuantityError> {
    if value.is_empty() {
        return Err(QuantityError::Empty);
    }

    let unsigned = match value.as_bytes().first() {
        Some(b'-') => return Err(QuantityError::Negative(value.to_string())),
        Some(b'+') => &value[1..],
        _ => value,
    };

    let mut digits = 0usize;
    let mut seen_dot = false;
    let number_len = unsigned
        .char_indices()
        .take_while(|(_, c)| {
            if c.is_ascii_digit() {
                digits += 1;
                true
            } else if *c == '.' && !seen_dot {
                seen_dot = true;
                true
            } else {
                false
            }
        })
        .map(|(i, c)| i + c.len_utf8())
        .last()
        .unwrap_or(0);

    if digits == 0 {
        return Err(QuantityError::InvalidNumber(value.to_string()));
    }

    let suffix = &unsigned[number_len..];
    if BINARY_SI.contains(&suffix) || DECIMAL_SI.contains(&suffix) || is_decimal_exponent(suffix) {
        Ok(())
    } else {
        Err(QuantityError::UnknownSuffix {
            value: value.to_string(),
            suffix: suffix.to_string(),
        })
    }
}

fn is_decimal_exponent(suffix: &str) -> bool {
    let Some(exponent) = suffix.strip_prefix('e').or_else(|| suffix.strip_prefix('E')) else {
        return false;
    };
    let exponent = exponent
        .strip_prefix('+')
        .or_else(|| exponent.strip_prefix('-'))
        .unwrap_or(exponent);
    !exponent.is_empty() && exponent.bytes().all(|b| b.is_ascii_digit())
}
