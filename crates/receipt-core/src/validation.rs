//! Consistency checks on extracted receipt data.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::fields::{CanonicalField, ExtractedData};

/// Date format the extraction service is asked to produce.
pub const DATE_FORMAT: &str = "%Y/%m/%d";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Validation {
    pub is_valid: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

/// Check `data` for missing required fields and implausible amounts.
///
/// Errors make the record invalid; warnings are informational only.
pub fn validate(data: &ExtractedData) -> Validation {
    let mut errors = Vec::new();
    let mut warnings = Vec::new();

    for field in CanonicalField::REQUIRED {
        if data.get(field).is_null() {
            errors.push(format!("missing required field: {field}"));
        }
    }

    if let Some(date) = &data.transaction_date {
        if NaiveDate::parse_from_str(date, DATE_FORMAT).is_err() {
            errors.push(format!("transaction date is not yyyy/mm/dd: {date}"));
        }
    }

    if let Some(total) = data.total_amount {
        if total < 0 {
            errors.push(format!("total amount is negative: {total}"));
        }
        for field in [
            CanonicalField::Tax10Amount,
            CanonicalField::Tax8Amount,
            CanonicalField::Taxable10Amount,
            CanonicalField::Taxable8Amount,
        ] {
            if let Some(amount) = data.get(field).as_i64() {
                if amount > total {
                    warnings.push(format!("{field} ({amount}) exceeds total ({total})"));
                }
            }
        }
    }

    for (tax, base, rate) in [
        (data.tax_10_amount, data.taxable_10_amount, 10),
        (data.tax_8_amount, data.taxable_8_amount, 8),
    ] {
        match (tax, base) {
            (Some(_), None) => warnings.push(format!("{rate}% tax amount without taxable base")),
            (None, Some(_)) => warnings.push(format!("{rate}% taxable base without tax amount")),
            _ => {}
        }
    }

    Validation {
        is_valid: errors.is_empty(),
        errors,
        warnings,
    }
}
