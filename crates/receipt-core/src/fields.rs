//! Canonical receipt fields and the typed extracted-data record.
//!
//! The extraction service (and older workspace files) may use legacy key
//! names such as `"10% Tax Amount"`. Every map of raw fields goes through
//! [`ExtractedData::from_fields`] exactly once, which renames legacy keys,
//! drops unknown ones, and coerces amounts to integers. Nothing downstream
//! ever sees a legacy name.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::warn;

/// One of the fixed data points extracted from a receipt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CanonicalField {
    TransactionDate,
    StoreName,
    TotalAmount,
    Tax10Amount,
    Tax8Amount,
    Taxable10Amount,
    Taxable8Amount,
    RepresentativeItem,
}

/// Legacy key → canonical field. `"tax rate"` has no target and is dropped.
const LEGACY_NAMES: &[(&str, CanonicalField)] = &[
    ("10% Tax Amount", CanonicalField::Tax10Amount),
    ("8% Tax Amount", CanonicalField::Tax8Amount),
    ("10% tax base", CanonicalField::Taxable10Amount),
    ("8% tax base", CanonicalField::Taxable8Amount),
];

impl CanonicalField {
    /// All fields, in default `output_format` order.
    pub const ALL: [CanonicalField; 8] = [
        Self::TransactionDate,
        Self::StoreName,
        Self::TotalAmount,
        Self::Tax10Amount,
        Self::Tax8Amount,
        Self::Taxable10Amount,
        Self::Taxable8Amount,
        Self::RepresentativeItem,
    ];

    /// Fields the extraction service must always return.
    pub const REQUIRED: [CanonicalField; 3] =
        [Self::TransactionDate, Self::StoreName, Self::TotalAmount];

    /// The stable name used as JSON key and CSV header.
    pub fn name(self) -> &'static str {
        match self {
            Self::TransactionDate => "Transaction Date (yyyy/mm/dd only)",
            Self::StoreName => "Store Name",
            Self::TotalAmount => "Total Amount (currency symbol removed)",
            Self::Tax10Amount => "The amount of consumption tax at the rate of 10%",
            Self::Tax8Amount => "The amount of consumption tax at the rate of 8%",
            Self::Taxable10Amount => "The amount subject to 10% tax",
            Self::Taxable8Amount => "The amount subject to 8% tax",
            Self::RepresentativeItem => "Representative Item Name",
        }
    }

    /// Short label accepted on the command line.
    pub fn short_name(self) -> &'static str {
        match self {
            Self::TransactionDate => "date",
            Self::StoreName => "store",
            Self::TotalAmount => "total",
            Self::Tax10Amount => "tax10",
            Self::Tax8Amount => "tax8",
            Self::Taxable10Amount => "base10",
            Self::Taxable8Amount => "base8",
            Self::RepresentativeItem => "item",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|f| f.name() == name)
    }

    pub fn from_legacy_name(name: &str) -> Option<Self> {
        LEGACY_NAMES
            .iter()
            .find(|(legacy, _)| *legacy == name)
            .map(|(_, field)| *field)
    }

    /// Whether values of this field are integer amounts.
    pub fn is_amount(self) -> bool {
        !matches!(
            self,
            Self::TransactionDate | Self::StoreName | Self::RepresentativeItem
        )
    }
}

impl fmt::Display for CanonicalField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for CanonicalField {
    type Err = FieldError;

    /// Accepts a canonical name, a legacy name, or a short label.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_name(s)
            .or_else(|| Self::from_legacy_name(s))
            .or_else(|| {
                Self::ALL
                    .into_iter()
                    .find(|f| f.short_name().eq_ignore_ascii_case(s))
            })
            .ok_or_else(|| FieldError::UnknownField(s.to_string()))
    }
}

#[derive(Debug, Error, PartialEq)]
pub enum FieldError {
    #[error("unknown field: {0}")]
    UnknownField(String),

    #[error("{field} expects an integer amount, got {value}")]
    InvalidAmount { field: CanonicalField, value: String },
}

/// Extracted receipt data, one optional slot per canonical field.
///
/// Serializes with every canonical key present (`null` when absent), which
/// keeps `workspace.json` stable to diff.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ExtractedData {
    #[serde(rename = "Transaction Date (yyyy/mm/dd only)")]
    pub transaction_date: Option<String>,
    #[serde(rename = "Store Name")]
    pub store_name: Option<String>,
    #[serde(rename = "Total Amount (currency symbol removed)")]
    pub total_amount: Option<i64>,
    #[serde(rename = "The amount of consumption tax at the rate of 10%")]
    pub tax_10_amount: Option<i64>,
    #[serde(rename = "The amount of consumption tax at the rate of 8%")]
    pub tax_8_amount: Option<i64>,
    #[serde(rename = "The amount subject to 10% tax")]
    pub taxable_10_amount: Option<i64>,
    #[serde(rename = "The amount subject to 8% tax")]
    pub taxable_8_amount: Option<i64>,
    #[serde(rename = "Representative Item Name")]
    pub representative_item: Option<String>,
}

impl ExtractedData {
    /// Build typed data from a raw field map.
    ///
    /// Canonical keys take precedence over their legacy aliases when both
    /// carry a value. Unknown keys are dropped; values that cannot be coerced
    /// are logged and skipped, leaving whatever an alias already filled in.
    pub fn from_fields(fields: &Map<String, Value>) -> Self {
        let mut data = Self::default();

        for (key, value) in fields {
            if let Some(field) = CanonicalField::from_legacy_name(key) {
                if data.is_empty_slot(field) {
                    data.set_lenient(field, value);
                }
            }
        }
        for (key, value) in fields {
            if let Some(field) = CanonicalField::from_name(key) {
                if !value.is_null() || data.is_empty_slot(field) {
                    data.set_lenient(field, value);
                }
            }
        }

        data
    }

    /// The value of `field` as JSON (`null` when absent).
    pub fn get(&self, field: CanonicalField) -> Value {
        match field {
            CanonicalField::TransactionDate => opt_string(&self.transaction_date),
            CanonicalField::StoreName => opt_string(&self.store_name),
            CanonicalField::RepresentativeItem => opt_string(&self.representative_item),
            _ => self
                .amount_slot(field)
                .map_or(Value::Null, Value::from),
        }
    }

    /// Look a field up by any accepted name; unknown names read as `null`.
    pub fn get_by_name(&self, name: &str) -> Value {
        name.parse::<CanonicalField>()
            .map(|f| self.get(f))
            .unwrap_or(Value::Null)
    }

    /// Set `field` from a JSON value. `null` clears the slot.
    pub fn set(&mut self, field: CanonicalField, value: &Value) -> Result<(), FieldError> {
        if field.is_amount() {
            let amount = match value {
                Value::Null => None,
                other => Some(coerce_amount(other).ok_or_else(|| FieldError::InvalidAmount {
                    field,
                    value: other.to_string(),
                })?),
            };
            *self.amount_slot_mut(field) = amount;
        } else {
            *self.text_slot_mut(field) = coerce_text(value);
        }
        Ok(())
    }

    /// True when every field the service must return is present.
    pub fn has_required(&self) -> bool {
        CanonicalField::REQUIRED
            .into_iter()
            .all(|f| !self.get(f).is_null())
    }

    fn set_lenient(&mut self, field: CanonicalField, value: &Value) {
        if let Err(e) = self.set(field, value) {
            warn!(error = %e, "dropping uncoercible extracted value");
        }
    }

    fn is_empty_slot(&self, field: CanonicalField) -> bool {
        self.get(field).is_null()
    }

    fn amount_slot(&self, field: CanonicalField) -> Option<i64> {
        match field {
            CanonicalField::TotalAmount => self.total_amount,
            CanonicalField::Tax10Amount => self.tax_10_amount,
            CanonicalField::Tax8Amount => self.tax_8_amount,
            CanonicalField::Taxable10Amount => self.taxable_10_amount,
            CanonicalField::Taxable8Amount => self.taxable_8_amount,
            _ => None,
        }
    }

    fn amount_slot_mut(&mut self, field: CanonicalField) -> &mut Option<i64> {
        match field {
            CanonicalField::Tax10Amount => &mut self.tax_10_amount,
            CanonicalField::Tax8Amount => &mut self.tax_8_amount,
            CanonicalField::Taxable10Amount => &mut self.taxable_10_amount,
            CanonicalField::Taxable8Amount => &mut self.taxable_8_amount,
            _ => &mut self.total_amount,
        }
    }

    fn text_slot_mut(&mut self, field: CanonicalField) -> &mut Option<String> {
        match field {
            CanonicalField::StoreName => &mut self.store_name,
            CanonicalField::RepresentativeItem => &mut self.representative_item,
            _ => &mut self.transaction_date,
        }
    }
}

impl<'de> Deserialize<'de> for ExtractedData {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let fields = Option::<Map<String, Value>>::deserialize(deserializer)?;
        Ok(fields.map(|f| Self::from_fields(&f)).unwrap_or_default())
    }
}

fn opt_string(s: &Option<String>) -> Value {
    s.as_ref().map_or(Value::Null, |s| Value::String(s.clone()))
}

fn coerce_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if s.trim().is_empty() => None,
        Value::String(s) => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// Integers, integral floats, and digit strings decorated with `¥`, `円`,
/// `,` or whitespace.
fn coerce_amount(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64().or_else(|| {
            n.as_f64()
                .filter(|f| f.fract() == 0.0 && f.abs() < i64::MAX as f64)
                .map(|f| f as i64)
        }),
        Value::String(s) => {
            let cleaned: String = s
                .chars()
                .filter(|c| !matches!(c, '¥' | '￥' | '円' | ',') && !c.is_whitespace())
                .collect();
            cleaned.parse().ok()
        }
        _ => None,
    }
}
