//! Structural description of tool inputs.
//!
//! A tool declares its input once as an [`InputSchema`] tree. The same tree
//! renders the JSON-Schema shown to the model and validates the arguments the
//! model sends back before the tool runs.

use serde_json::{json, Map, Value};
use thiserror::Error;

/// Where in the input a validation failure happened, and why.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{path}: {message}")]
pub struct SchemaError {
    pub path: String,
    pub message: String,
}

impl SchemaError {
    fn new(path: &str, message: impl Into<String>) -> Self {
        Self {
            path: path.to_string(),
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum InputSchema {
    Object {
        description: Option<String>,
        properties: Vec<(String, InputSchema)>,
    },
    String {
        description: Option<String>,
    },
    Number {
        description: Option<String>,
    },
    Integer {
        description: Option<String>,
    },
    Boolean {
        description: Option<String>,
    },
    Enum {
        description: Option<String>,
        values: Vec<String>,
    },
    Array {
        description: Option<String>,
        items: Box<InputSchema>,
    },
    /// The wrapped value may be absent or `null`.
    Optional(Box<InputSchema>),
}

impl InputSchema {
    pub fn object() -> Self {
        InputSchema::Object {
            description: None,
            properties: Vec::new(),
        }
    }

    pub fn string(description: impl Into<String>) -> Self {
        InputSchema::String {
            description: Some(description.into()),
        }
    }

    pub fn number(description: impl Into<String>) -> Self {
        InputSchema::Number {
            description: Some(description.into()),
        }
    }

    pub fn integer(description: impl Into<String>) -> Self {
        InputSchema::Integer {
            description: Some(description.into()),
        }
    }

    pub fn boolean(description: impl Into<String>) -> Self {
        InputSchema::Boolean {
            description: Some(description.into()),
        }
    }

    pub fn enumeration<I, S>(description: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        InputSchema::Enum {
            description: Some(description.into()),
            values: values.into_iter().map(Into::into).collect(),
        }
    }

    pub fn array(description: impl Into<String>, items: InputSchema) -> Self {
        InputSchema::Array {
            description: Some(description.into()),
            items: Box::new(items),
        }
    }

    /// Wrap this schema so the value may be omitted.
    pub fn optional(self) -> Self {
        match self {
            already @ InputSchema::Optional(_) => already,
            other => InputSchema::Optional(Box::new(other)),
        }
    }

    /// Add a field to an object schema. Has no effect on other variants.
    pub fn property(mut self, name: impl Into<String>, schema: InputSchema) -> Self {
        if let InputSchema::Object { properties, .. } = &mut self {
            properties.push((name.into(), schema));
        }
        self
    }

    pub fn is_optional(&self) -> bool {
        matches!(self, InputSchema::Optional(_))
    }

    /// Names of the object fields that must be present.
    pub fn required_fields(&self) -> Vec<&str> {
        match self {
            InputSchema::Object { properties, .. } => properties
                .iter()
                .filter(|(_, schema)| !schema.is_optional())
                .map(|(name, _)| name.as_str())
                .collect(),
            InputSchema::Optional(inner) => inner.required_fields(),
            _ => Vec::new(),
        }
    }

    /// Render the model-facing JSON-Schema.
    pub fn to_json_schema(&self) -> Value {
        let (mut rendered, description) = match self {
            InputSchema::Object {
                description,
                properties,
            } => {
                let props: Map<String, Value> = properties
                    .iter()
                    .map(|(name, schema)| (name.clone(), schema.to_json_schema()))
                    .collect();
                (
                    json!({
                        "type": "object",
                        "properties": props,
                        "required": self.required_fields(),
                        "additionalProperties": false,
                    }),
                    description,
                )
            }
            InputSchema::String { description } => (json!({ "type": "string" }), description),
            InputSchema::Number { description } => (json!({ "type": "number" }), description),
            InputSchema::Integer { description } => (json!({ "type": "integer" }), description),
            InputSchema::Boolean { description } => (json!({ "type": "boolean" }), description),
            InputSchema::Enum {
                description,
                values,
            } => (json!({ "type": "string", "enum": values }), description),
            InputSchema::Array { description, items } => (
                json!({ "type": "array", "items": items.to_json_schema() }),
                description,
            ),
            // Optionality is expressed by the parent's `required` list.
            InputSchema::Optional(inner) => return inner.to_json_schema(),
        };

        if let (Some(text), Some(obj)) = (description, rendered.as_object_mut()) {
            obj.insert("description".to_string(), Value::String(text.clone()));
        }
        rendered
    }

    pub fn validate(&self, value: &Value) -> Result<(), SchemaError> {
        self.validate_at(value, "$")
    }

    fn validate_at(&self, value: &Value, path: &str) -> Result<(), SchemaError> {
        match self {
            InputSchema::Optional(inner) => {
                if value.is_null() {
                    Ok(())
                } else {
                    inner.validate_at(value, path)
                }
            }
            InputSchema::Object { properties, .. } => {
                let obj = value
                    .as_object()
                    .ok_or_else(|| mismatch("object", value, path))?;

                for key in obj.keys() {
                    if !properties.iter().any(|(name, _)| name == key) {
                        return Err(SchemaError::new(
                            &format!("{}.{}", path, key),
                            "unexpected field",
                        ));
                    }
                }

                for (name, schema) in properties {
                    let field_path = format!("{}.{}", path, name);
                    match obj.get(name) {
                        Some(field) => schema.validate_at(field, &field_path)?,
                        None if schema.is_optional() => {}
                        None => {
                            return Err(SchemaError::new(&field_path, "missing required field"))
                        }
                    }
                }
                Ok(())
            }
            InputSchema::String { .. } => expect(value.is_string(), "string", value, path),
            InputSchema::Number { .. } => expect(value.is_number(), "number", value, path),
            InputSchema::Integer { .. } => {
                expect(value.is_i64() || value.is_u64(), "integer", value, path)
            }
            InputSchema::Boolean { .. } => expect(value.is_boolean(), "boolean", value, path),
            InputSchema::Enum { values, .. } => {
                let s = value
                    .as_str()
                    .ok_or_else(|| mismatch("string", value, path))?;
                if values.iter().any(|v| v == s) {
                    Ok(())
                } else {
                    Err(SchemaError::new(
                        path,
                        format!("'{}' is not one of [{}]", s, values.join(", ")),
                    ))
                }
            }
            InputSchema::Array { items, .. } => {
                let arr = value
                    .as_array()
                    .ok_or_else(|| mismatch("array", value, path))?;
                for (i, item) in arr.iter().enumerate() {
                    items.validate_at(item, &format!("{}[{}]", path, i))?;
                }
                Ok(())
            }
        }
    }
}

fn expect(ok: bool, expected: &str, value: &Value, path: &str) -> Result<(), SchemaError> {
    if ok {
        Ok(())
    } else {
        Err(SchemaError::new(
            path,
            format!("expected {}, got {}", expected, kind_of(value)),
        ))
    }
}

fn mismatch(expected: &str, value: &Value, path: &str) -> SchemaError {
    SchemaError::new(path, format!("expected {}, got {}", expected, kind_of(value)))
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn validate_schema() -> InputSchema {
        InputSchema::object()
            .property("url", InputSchema::string("LinkedIn URL"))
            .property(
                "expected_type",
                InputSchema::enumeration("Profile kind", ["company", "person", "event"]).optional(),
            )
    }

    #[test]
    fn test_json_schema_required_excludes_optional() {
        let schema = validate_schema().to_json_schema();
        assert_eq!(schema["type"], "object");
        assert_eq!(schema["required"], json!(["url"]));
        assert_eq!(schema["properties"]["url"]["description"], "LinkedIn URL");
        assert_eq!(
            schema["properties"]["expected_type"]["enum"],
            json!(["company", "person", "event"])
        );
        assert_eq!(schema["additionalProperties"], false);
    }

    #[test]
    fn test_nested_array_schema() {
        let schema = InputSchema::array("Queries", InputSchema::string("One query"));
        let rendered = schema.to_json_schema();
        assert_eq!(rendered["type"], "array");
        assert_eq!(rendered["items"]["type"], "string");
    }

    #[test]
    fn test_validate_accepts_valid_input() {
        let schema = validate_schema();
        assert!(schema
            .validate(&json!({"url": "https://www.linkedin.com/company/tomorrowland"}))
            .is_ok());
        assert!(schema
            .validate(&json!({"url": "https://x", "expected_type": "company"}))
            .is_ok());
        assert!(schema
            .validate(&json!({"url": "https://x", "expected_type": null}))
            .is_ok());
    }

    #[test]
    fn test_validate_missing_required() {
        let err = validate_schema().validate(&json!({})).unwrap_err();
        assert_eq!(err.path, "$.url");
        assert!(err.message.contains("missing"));
    }

    #[test]
    fn test_validate_wrong_type_and_enum() {
        let err = validate_schema().validate(&json!({"url": 42})).unwrap_err();
        assert_eq!(err.to_string(), "$.url: expected string, got number");

        let err = validate_schema()
            .validate(&json!({"url": "x", "expected_type": "venue"}))
            .unwrap_err();
        assert_eq!(err.path, "$.expected_type");
    }

    #[test]
    fn test_validate_rejects_unknown_field() {
        let err = validate_schema()
            .validate(&json!({"url": "x", "depth": 3}))
            .unwrap_err();
        assert_eq!(err.path, "$.depth");
    }

    #[test]
    fn test_validate_array_items_and_integers() {
        let schema = InputSchema::object()
            .property("ids", InputSchema::array("ids", InputSchema::integer("id")));
        assert!(schema.validate(&json!({"ids": [1, 2, 3]})).is_ok());
        let err = schema.validate(&json!({"ids": [1, 2.5]})).unwrap_err();
        assert_eq!(err.path, "$.ids[1]");
    }

    #[test]
    fn test_optional_is_idempotent() {
        let schema = InputSchema::string("s").optional().optional();
        assert!(matches!(schema, InputSchema::Optional(ref inner) if !inner.is_optional()));
    }
}
