//! Locale-tolerant numeric coercion for raw telemetry fields.

use serde::{Deserialize, Serialize};

/// Outcome of coercing one raw field.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub enum Numeric {
    Valid(f64),
    Missing,
}

impl Numeric {
    pub fn value(self) -> Option<f64> {
        match self {
            Numeric::Valid(v) => Some(v),
            Numeric::Missing => None,
        }
    }

    pub fn is_missing(self) -> bool {
        matches!(self, Numeric::Missing)
    }
}

impl From<Option<f64>> for Numeric {
    fn from(value: Option<f64>) -> Self {
        value.map_or(Numeric::Missing, Numeric::Valid)
    }
}

/// Coerce a raw field such as `"12,5"` or `" 3.14"` into a number.
///
/// A comma decimal separator is rewritten to a period before parsing. Anything
/// that does not parse, and any non-finite result (`NaN`, `inf`), is `Missing`.
pub fn coerce_numeric(raw: &str) -> Numeric {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Numeric::Missing;
    }
    let normalized = trimmed.replace(',', ".");
    match normalized.parse::<f64>() {
        Ok(v) if v.is_finite() => Numeric::Valid(v),
        _ => Numeric::Missing,
    }
}

/// Like [`coerce_numeric`], treating an absent field as `Missing`.
pub fn coerce_field(raw: Option<&str>) -> Numeric {
    raw.map_or(Numeric::Missing, coerce_numeric)
}
