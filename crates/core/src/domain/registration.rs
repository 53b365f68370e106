use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

/// Key written on every stored record.
pub const PRIMARY_KEY: &str = "registration_id";
/// Key used by older registration exports and result files.
pub const LEGACY_KEY: &str = "RegistrationNumber";

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RegistrationId(pub String);

impl fmt::Display for RegistrationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum RegistrationError {
    #[error("registrations input must be a JSON list")]
    NotAList,
    #[error("registration at index {index} is not a JSON object")]
    NotAnObject { index: usize },
    #[error("registration at index {index} has neither `{PRIMARY_KEY}` nor `{LEGACY_KEY}`")]
    MissingId { index: usize },
}

/// One unit of work. The engine never mutates it; every field besides the
/// normalized id is carried through to the negotiation message untouched.
#[derive(Clone, Debug, PartialEq)]
pub struct Registration {
    pub id: RegistrationId,
    pub fields: Map<String, Value>,
}

impl Registration {
    pub fn from_value(index: usize, value: Value) -> Result<Self, RegistrationError> {
        let Value::Object(mut fields) = value else {
            return Err(RegistrationError::NotAnObject { index });
        };
        let id = key_of(&fields).ok_or(RegistrationError::MissingId { index })?;
        fields.insert(PRIMARY_KEY.to_string(), Value::String(id.clone()));

        Ok(Self { id: RegistrationId(id), fields })
    }

    pub fn to_value(&self) -> Value {
        Value::Object(self.fields.clone())
    }
}

pub fn parse_registrations(value: Value) -> Result<Vec<Registration>, RegistrationError> {
    let Value::Array(items) = value else {
        return Err(RegistrationError::NotAList);
    };

    items.into_iter().enumerate().map(|(index, item)| Registration::from_value(index, item)).collect()
}

/// Logical key of a stored record: the primary key, else the legacy key.
/// Numeric ids are normalized to their decimal string form.
pub fn record_key(record: &Value) -> Option<String> {
    match record {
        Value::Object(fields) => key_of(fields),
        _ => None,
    }
}

fn key_of(fields: &Map<String, Value>) -> Option<String> {
    [PRIMARY_KEY, LEGACY_KEY]
        .iter()
        .find_map(|key| {
            fields.get(*key).and_then(scalar_to_string).filter(|id| !id.trim().is_empty())
        })
}

fn scalar_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(text) => Some(text.clone()),
        Value::Number(number) => Some(number.to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::{parse_registrations, record_key, Registration, RegistrationError, PRIMARY_KEY};

    #[test]
    fn legacy_key_is_normalized_on_load() {
        let registration =
            Registration::from_value(0, json!({"RegistrationNumber": 4411, "Contact_Zip": "55407"}))
                .expect("registration should parse");

        assert_eq!(registration.id.0, "4411");
        assert_eq!(registration.fields[PRIMARY_KEY], json!("4411"));
        assert_eq!(registration.fields["Contact_Zip"], json!("55407"));
    }

    #[test]
    fn primary_key_wins_over_legacy_key() {
        let record = json!({"registration_id": "R-1", "RegistrationNumber": "OLD-1"});
        assert_eq!(record_key(&record).as_deref(), Some("R-1"));
    }

    #[test]
    fn blank_ids_are_not_keys() {
        assert_eq!(record_key(&json!({"registration_id": "  "})), None);
        assert_eq!(record_key(&json!(["registration_id"])), None);
    }

    #[test]
    fn non_list_input_is_a_format_error() {
        let error = parse_registrations(json!({"registration_id": "R-1"}))
            .expect_err("object input must be rejected");
        assert_eq!(error, RegistrationError::NotAList);
    }

    #[test]
    fn missing_id_reports_index() {
        let error = parse_registrations(json!([{"registration_id": "R-1"}, {"Contact_Zip": "1"}]))
            .expect_err("second registration has no id");
        assert_eq!(error, RegistrationError::MissingId { index: 1 });
    }
}
