//! Declarative response-format descriptors.
//!
//! A [`ResponseFormat`] is enough to decide conformance of a parsed JSON value,
//! to render the format hint embedded in prompts, and to produce the JSON
//! Schema handed to providers that support structured decoding.

use serde_json::{json, Map, Value};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq)]
pub enum ValueType {
    String,
    /// A string drawn from a set only known at runtime.
    OneOf(Vec<String>),
    /// Inclusive range. JSON booleans never satisfy this.
    Integer { min: i64, max: i64 },
    /// Inclusive range. The value must be written as a float: `3` is
    /// rejected, `3.0` is accepted.
    Float { min: f64, max: f64 },
    Boolean,
    StringList { min_len: usize, max_len: Option<usize> },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Field {
    pub key: String,
    pub ty: ValueType,
}

impl Field {
    pub fn new(key: impl Into<String>, ty: ValueType) -> Self {
        Self { key: key.into(), ty }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ResponseFormat {
    /// A JSON object carrying every field (extra keys are ignored).
    Object(Vec<Field>),
    /// A top-level JSON array whose elements are objects carrying every field.
    ListOf { fields: Vec<Field>, min_items: usize },
}

/// The first check a value failed.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum Violation {
    #[error("not valid JSON: {0}")]
    NotJson(String),
    #[error("expected a JSON object")]
    NotAnObject,
    #[error("expected a JSON array")]
    NotAnArray,
    #[error("expected at least {min} element(s), got {len}")]
    TooFewItems { min: usize, len: usize },
    #[error("missing key '{0}'")]
    MissingKey(String),
    #[error("'{key}' should be {expected}")]
    WrongType { key: String, expected: &'static str },
    #[error("'{key}' = {value} is outside {min}..={max}")]
    OutOfRange { key: String, value: String, min: String, max: String },
    #[error("'{key}' has {len} item(s), expected {expected}")]
    WrongLength { key: String, len: usize, expected: String },
    #[error("'{key}' = {value:?} is not an allowed value")]
    NotAllowed { key: String, value: String },
    #[error("element {index}: {violation}")]
    Element { index: usize, violation: Box<Violation> },
}

impl ValueType {
    fn check(&self, key: &str, value: &Value) -> Result<(), Violation> {
        let wrong = |expected| Violation::WrongType { key: key.to_string(), expected };
        match self {
            ValueType::String => value.as_str().map(|_| ()).ok_or_else(|| wrong("a string")),
            ValueType::OneOf(allowed) => {
                let s = value.as_str().ok_or_else(|| wrong("a string"))?;
                if allowed.iter().any(|a| a == s) {
                    Ok(())
                } else {
                    Err(Violation::NotAllowed { key: key.to_string(), value: s.to_string() })
                }
            }
            ValueType::Integer { min, max } => {
                let n = match value {
                    Value::Number(n) if n.is_i64() || n.is_u64() => n,
                    _ => return Err(wrong("an integer")),
                };
                let in_range = n.as_i64().map(|i| i >= *min && i <= *max).unwrap_or(false);
                if in_range {
                    Ok(())
                } else {
                    Err(Violation::OutOfRange {
                        key: key.to_string(),
                        value: n.to_string(),
                        min: min.to_string(),
                        max: max.to_string(),
                    })
                }
            }
            ValueType::Float { min, max } => {
                let n = match value {
                    Value::Number(n) if n.is_f64() => n.as_f64().ok_or_else(|| wrong("a float"))?,
                    _ => return Err(wrong("a float")),
                };
                if n >= *min && n <= *max {
                    Ok(())
                } else {
                    Err(Violation::OutOfRange {
                        key: key.to_string(),
                        value: n.to_string(),
                        min: min.to_string(),
                        max: max.to_string(),
                    })
                }
            }
            ValueType::Boolean => value.as_bool().map(|_| ()).ok_or_else(|| wrong("a boolean")),
            ValueType::StringList { min_len, max_len } => {
                let items = value.as_array().ok_or_else(|| wrong("a list of strings"))?;
                if !items.iter().all(Value::is_string) {
                    return Err(wrong("a list of strings"));
                }
                let len = items.len();
                if len < *min_len || max_len.map(|m| len > m).unwrap_or(false) {
                    return Err(Violation::WrongLength {
                        key: key.to_string(),
                        len,
                        expected: describe_len(*min_len, *max_len),
                    });
                }
                Ok(())
            }
        }
    }

    fn hint(&self) -> String {
        match self {
            ValueType::String => quote("string"),
            ValueType::OneOf(allowed) => quote(&format!("one of: {}", allowed.join(", "))),
            ValueType::Integer { min, max } => quote(&format!("int ({min}-{max})")),
            ValueType::Float { min, max } => quote(&format!("float ({min}-{max})")),
            ValueType::Boolean => quote("bool"),
            ValueType::StringList { min_len, max_len } => match max_len {
                Some(max) if max == min_len => {
                    let items = vec![quote("string"); *min_len];
                    format!("[{}]", items.join(", "))
                }
                _ => format!("[{}, ...]", quote("string")),
            },
        }
    }

    /// JSON Schema has no float-only type, so this is looser than `check` at
    /// the edges: `"integer"` also matches `3.0` and `"number"` also matches
    /// `3`. The validator stays authoritative on decoded output.
    fn json_schema(&self) -> Value {
        match self {
            ValueType::String => json!({ "type": "string" }),
            ValueType::OneOf(allowed) => json!({ "type": "string", "enum": allowed }),
            ValueType::Integer { min, max } => json!({ "type": "integer", "minimum": min, "maximum": max }),
            ValueType::Float { min, max } => json!({ "type": "number", "minimum": min, "maximum": max }),
            ValueType::Boolean => json!({ "type": "boolean" }),
            ValueType::StringList { min_len, max_len } => {
                let mut schema = json!({
                    "type": "array",
                    "items": { "type": "string" },
                    "minItems": min_len,
                });
                if let Some(max) = max_len {
                    schema["maxItems"] = json!(max);
                }
                schema
            }
        }
    }
}

impl ResponseFormat {
    /// Checks required keys, runtime types, then ranges and lengths.
    pub fn check(&self, value: &Value) -> Result<(), Violation> {
        match self {
            ResponseFormat::Object(fields) => check_object(fields, value),
            ResponseFormat::ListOf { fields, min_items } => {
                let items = value.as_array().ok_or(Violation::NotAnArray)?;
                if items.len() < *min_items {
                    return Err(Violation::TooFewItems { min: *min_items, len: items.len() });
                }
                for (index, item) in items.iter().enumerate() {
                    check_object(fields, item)
                        .map_err(|v| Violation::Element { index, violation: Box::new(v) })?;
                }
                Ok(())
            }
        }
    }

    /// The format hint embedded in prompts, e.g. `{"context_score": "int (0-5)"}`.
    pub fn describe(&self) -> String {
        match self {
            ResponseFormat::Object(fields) => describe_object(fields),
            ResponseFormat::ListOf { fields, .. } => format!("[{}, ...]", describe_object(fields)),
        }
    }

    pub fn json_schema(&self) -> Value {
        match self {
            ResponseFormat::Object(fields) => object_schema(fields),
            ResponseFormat::ListOf { fields, min_items } => json!({
                "type": "array",
                "items": object_schema(fields),
                "minItems": min_items,
            }),
        }
    }

    pub fn fields(&self) -> &[Field] {
        match self {
            ResponseFormat::Object(fields) => fields,
            ResponseFormat::ListOf { fields, .. } => fields,
        }
    }
}

fn check_object(fields: &[Field], value: &Value) -> Result<(), Violation> {
    let obj = value.as_object().ok_or(Violation::NotAnObject)?;
    if let Some(missing) = fields.iter().find(|f| !obj.contains_key(&f.key)) {
        return Err(Violation::MissingKey(missing.key.clone()));
    }
    for field in fields {
        // presence checked above
        if let Some(v) = obj.get(&field.key) {
            field.ty.check(&field.key, v)?;
        }
    }
    Ok(())
}

fn describe_object(fields: &[Field]) -> String {
    let parts: Vec<String> = fields
        .iter()
        .map(|f| format!("{}: {}", quote(&f.key), f.ty.hint()))
        .collect();
    format!("{{{}}}", parts.join(", "))
}

fn object_schema(fields: &[Field]) -> Value {
    let mut properties = Map::new();
    for f in fields {
        properties.insert(f.key.clone(), f.ty.json_schema());
    }
    let required: Vec<&str> = fields.iter().map(|f| f.key.as_str()).collect();
    json!({
        "type": "object",
        "properties": properties,
        "required": required,
    })
}

fn describe_len(min: usize, max: Option<usize>) -> String {
    match max {
        Some(max) if max == min => format!("exactly {min}"),
        Some(max) => format!("{min} to {max}"),
        None => format!("at least {min}"),
    }
}

fn quote(s: &str) -> String {
    Value::String(s.to_string()).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn confidence() -> Vec<Field> {
        vec![
            Field::new("Answer", ValueType::String),
            Field::new("Confidence", ValueType::Integer { min: 0, max: 5 }),
        ]
    }

    #[test]
    fn booleans_are_not_integers() {
        let ty = ValueType::Integer { min: 0, max: 5 };
        assert!(ty.check("k", &json!(1)).is_ok());
        assert!(matches!(ty.check("k", &json!(true)), Err(Violation::WrongType { .. })));
        assert!(matches!(ty.check("k", &json!(2.5)), Err(Violation::WrongType { .. })));
        assert!(matches!(ty.check("k", &json!(-1)), Err(Violation::OutOfRange { .. })));
    }

    #[test]
    fn floats_reject_integers_and_booleans() {
        let ty = ValueType::Float { min: 0.0, max: 5.0 };
        assert!(ty.check("k", &json!(4.5)).is_ok());
        assert!(ty.check("k", &json!(3.0)).is_ok());
        assert_eq!(
            ty.check("k", &json!(3)),
            Err(Violation::WrongType { key: "k".into(), expected: "a float" })
        );
        assert!(ty.check("k", &json!(false)).is_err());
        assert!(ty.check("k", &json!(5.01)).is_err());
    }

    #[test]
    fn missing_key_is_reported_before_types() {
        let format = ResponseFormat::Object(confidence());
        let err = format.check(&json!({ "Answer": 3 })).unwrap_err();
        assert_eq!(err, Violation::MissingKey("Confidence".into()));
    }

    #[test]
    fn list_elements_are_checked_individually() {
        let format = ResponseFormat::ListOf { fields: confidence(), min_items: 1 };
        let err = format
            .check(&json!([{ "Answer": "x", "Confidence": 3 }, { "Answer": "y", "Confidence": 7 }]))
            .unwrap_err();
        assert!(matches!(err, Violation::Element { index: 1, .. }));
        assert!(matches!(format.check(&json!([])), Err(Violation::TooFewItems { .. })));
    }

    #[test]
    fn string_list_length_bounds() {
        let ty = ValueType::StringList { min_len: 3, max_len: Some(3) };
        assert!(ty.check("q", &json!(["a", "b", "c"])).is_ok());
        assert!(matches!(ty.check("q", &json!(["a"])), Err(Violation::WrongLength { .. })));
        assert!(matches!(ty.check("q", &json!(["a", 1, "c"])), Err(Violation::WrongType { .. })));
    }

    #[test]
    fn describe_renders_prompt_hints() {
        let format = ResponseFormat::Object(vec![Field::new("context_score", ValueType::Integer { min: 0, max: 5 })]);
        assert_eq!(format.describe(), r#"{"context_score": "int (0-5)"}"#);

        let list = ResponseFormat::ListOf { fields: confidence(), min_items: 1 };
        assert_eq!(list.describe(), r#"[{"Answer": "string", "Confidence": "int (0-5)"}, ...]"#);

        let paraphrase = ResponseFormat::Object(vec![Field::new(
            "paraphrased_questions",
            ValueType::StringList { min_len: 3, max_len: Some(3) },
        )]);
        assert_eq!(paraphrase.describe(), r#"{"paraphrased_questions": ["string", "string", "string"]}"#);
    }

    #[test]
    fn json_schema_lists_required_keys() {
        let schema = ResponseFormat::Object(confidence()).json_schema();
        assert_eq!(schema["required"], json!(["Answer", "Confidence"]));
        assert_eq!(schema["properties"]["Confidence"]["maximum"], json!(5));
    }
}
