//! Request boundary: raw identify bodies and their normalised form.
//!
//! Raw bodies are loosely typed: `phoneNumber` may arrive as a string or a
//! number, and empty values stand for "not given". [`IdentifyRequest::normalize`]
//! turns a raw body into an [`IdentifyQuery`], which always carries at least
//! one contact point.

use serde::Deserialize;
use serde_json::{Number, Value};

use crate::error::ValidationError;

/// A raw JSON field value before type checking.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    /// A JSON string.
    Text(String),
    /// A JSON number.
    Number(Number),
    /// Any other JSON value (bool, array, object).
    Other(Value),
}

/// Raw JSON body of an identify request.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct IdentifyRequest {
    /// `email`, expected to be a string.
    pub email: Option<FieldValue>,
    /// `phoneNumber`, a string or a number.
    pub phone_number: Option<FieldValue>,
}

impl IdentifyRequest {
    /// Validate and normalise into a query.
    ///
    /// `null`, a missing field, `""` and `0` all count as absent. A numeric
    /// phone number becomes its decimal string.
    pub fn normalize(&self) -> Result<IdentifyQuery, ValidationError> {
        let email = match &self.email {
            None => None,
            Some(FieldValue::Text(s)) => Some(s.clone()),
            Some(FieldValue::Number(n)) if is_zero(n) => None,
            Some(_) => {
                return Err(ValidationError::InvalidFieldType {
                    field: "email",
                    expected: "string",
                })
            }
        };

        let phone_number = match &self.phone_number {
            None => None,
            Some(FieldValue::Text(s)) => Some(s.clone()),
            Some(FieldValue::Number(n)) if is_zero(n) => None,
            Some(FieldValue::Number(n)) => Some(number_to_string(n)),
            Some(FieldValue::Other(_)) => {
                return Err(ValidationError::InvalidFieldType {
                    field: "phoneNumber",
                    expected: "string or number",
                })
            }
        };

        IdentifyQuery::new(email, phone_number)
    }
}

/// Raw `application/x-www-form-urlencoded` body of an identify request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FormIdentifyRequest {
    /// `email` form field.
    pub email: Option<String>,
    /// `phoneNumber` form field.
    pub phone_number: Option<String>,
}

impl FormIdentifyRequest {
    /// Validate and normalise into a query. Empty fields count as absent.
    pub fn normalize(self) -> Result<IdentifyQuery, ValidationError> {
        IdentifyQuery::new(self.email, self.phone_number)
    }
}

fn is_zero(n: &Number) -> bool {
    n.as_f64() == Some(0.0)
}

/// Text form of a JSON number, as JavaScript's `String(n)` writes it.
///
/// Integral floats print without a fraction. Magnitudes from `1e21` up or
/// below `1e-6` use exponent form with an explicit sign (`1e+21`, `1.5e-7`).
fn number_to_string(n: &Number) -> String {
    if let Some(i) = n.as_i64() {
        return i.to_string();
    }
    if let Some(u) = n.as_u64() {
        return u.to_string();
    }
    match n.as_f64() {
        Some(f) if f != 0.0 && (f.abs() >= 1e21 || f.abs() < 1e-6) => {
            let exp = format!("{f:e}");
            match exp.split_once('e') {
                Some((mantissa, power)) if !power.starts_with('-') => format!("{mantissa}e+{power}"),
                _ => exp,
            }
        }
        Some(f) => f.to_string(),
        None => n.to_string(),
    }
}

/// A validated identify request: at least one of email and phone is present
/// and neither is empty.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentifyQuery {
    email: Option<String>,
    phone_number: Option<String>,
}

impl IdentifyQuery {
    /// Build a query, dropping empty strings.
    ///
    /// # Errors
    /// `MissingContactPoint` if nothing is left.
    pub fn new(
        email: Option<String>,
        phone_number: Option<String>,
    ) -> Result<Self, ValidationError> {
        let email = email.filter(|e| !e.is_empty());
        let phone_number = phone_number.filter(|p| !p.is_empty());
        if email.is_none() && phone_number.is_none() {
            return Err(ValidationError::MissingContactPoint);
        }
        Ok(Self {
            email,
            phone_number,
        })
    }

    /// The email, if given.
    #[must_use]
    pub fn email(&self) -> Option<&str> {
        self.email.as_deref()
    }

    /// The phone number, if given.
    #[must_use]
    pub fn phone_number(&self) -> Option<&str> {
        self.phone_number.as_deref()
    }
}
