//! JSON field extraction shared by the venue decoders.
//! Venues send numbers both as JSON numbers and as strings.

use serde_json::Value;

use crate::error::DecodeError;

fn parse_number(value: &Value, field: &'static str) -> Result<f64, DecodeError> {
    let parsed = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    parsed
        .filter(|n| n.is_finite())
        .ok_or_else(|| DecodeError::InvalidNumber {
            field,
            value: value.to_string(),
        })
}

/// Required numeric field
pub(crate) fn number(data: &Value, field: &'static str) -> Result<f64, DecodeError> {
    let value = data.get(field).ok_or(DecodeError::MissingField(field))?;
    parse_number(value, field)
}

/// Numeric field that may be absent or null; present but malformed is still an error
pub(crate) fn optional_number(
    data: &Value,
    field: &'static str,
) -> Result<Option<f64>, DecodeError> {
    match data.get(field) {
        None | Some(Value::Null) => Ok(None),
        Some(value) => parse_number(value, field).map(Some),
    }
}

/// First present numeric field among `fields`
pub(crate) fn first_number(data: &Value, fields: &[&'static str]) -> Result<f64, DecodeError> {
    for field in fields {
        if let Some(n) = optional_number(data, field)? {
            return Ok(n);
        }
    }
    Err(DecodeError::MissingField(fields.first().copied().unwrap_or("price")))
}

pub(crate) fn string<'a>(data: &'a Value, field: &'static str) -> Result<&'a str, DecodeError> {
    data.get(field)
        .and_then(Value::as_str)
        .ok_or(DecodeError::MissingField(field))
}

pub(crate) fn optional_string(data: &Value, field: &str) -> Option<String> {
    data.get(field).and_then(Value::as_str).map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn numbers_parse_from_strings_and_numbers() {
        let data = json!({"a": "1.5", "b": 2.25, "c": "abc", "d": null});
        assert_eq!(number(&data, "a").unwrap(), 1.5);
        assert_eq!(number(&data, "b").unwrap(), 2.25);
        assert!(matches!(number(&data, "c"), Err(DecodeError::InvalidNumber { .. })));
        assert!(matches!(number(&data, "z"), Err(DecodeError::MissingField("z"))));
        assert_eq!(optional_number(&data, "d").unwrap(), None);
        assert_eq!(first_number(&data, &["z", "b"]).unwrap(), 2.25);
    }
}
