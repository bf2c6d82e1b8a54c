use crate::context::FieldValue;
use serde::{Deserialize, Serialize};
use std::ops::RangeInclusive;

/// Years accepted without a warning.
pub const PLAUSIBLE_YEARS: RangeInclusive<i64> = 2024..=2030;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldValidation {
    pub valid: bool,
    pub warnings: Vec<String>,
}

impl FieldValidation {
    fn ok() -> Self {
        Self {
            valid: true,
            warnings: Vec::new(),
        }
    }
}

/// Structural check of a caller-supplied value. Only `annee` is checked;
/// any warning makes the value invalid.
pub fn validate_value(field: &str, value: &FieldValue) -> FieldValidation {
    if field != "annee" {
        return FieldValidation::ok();
    }

    let year = match value {
        FieldValue::Number(n) => n.as_i64().or_else(|| {
            n.as_f64()
                .filter(|f| f.is_finite())
                .map(|f| f.trunc() as i64)
        }),
        FieldValue::Text(text) => text.trim().parse::<i64>().ok(),
        FieldValue::Flag(flag) => Some(i64::from(*flag)),
        _ => None,
    };

    match year {
        Some(year) if PLAUSIBLE_YEARS.contains(&year) => FieldValidation::ok(),
        Some(year) => FieldValidation {
            valid: false,
            warnings: vec![format!("Year {} looks unusually far away", year)],
        },
        None => FieldValidation {
            valid: false,
            warnings: vec!["Invalid year format".to_string()],
        },
    }
}
