//! Tool input schema shaping per model family.

use serde_json::{Map, Value};

/// Keys stripped from the root of a schema for Gemini.
const GEMINI_ROOT_KEYS: &[&str] = &[
    "$schema",
    "$id",
    "title",
    "description",
    "additionalProperties",
    "default",
];

/// Keys stripped from nested property and item schemas for Gemini.
const GEMINI_NESTED_KEYS: &[&str] = &["$schema", "$id", "additionalProperties", "default"];

/// How tool schemas are presented to the model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SchemaDialect {
    /// Pass provider schemas through unchanged.
    #[default]
    Standard,
    /// Gemini's OpenAPI subset: no `$schema`/`additionalProperties`/`default`,
    /// upper-case type names.
    Gemini,
}

impl SchemaDialect {
    /// Pick the dialect from a model id such as `google/gemini-2.0-flash`.
    pub fn for_model(model: &str) -> Self {
        if model.to_ascii_lowercase().contains("gemini") {
            SchemaDialect::Gemini
        } else {
            SchemaDialect::Standard
        }
    }

    pub fn apply(self, schema: &Value) -> Value {
        match self {
            SchemaDialect::Standard => schema.clone(),
            SchemaDialect::Gemini => sanitize_for_gemini(schema),
        }
    }
}

/// Clean a JSON schema for Gemini function declarations.
///
/// Non-object input is returned unchanged.
pub fn sanitize_for_gemini(schema: &Value) -> Value {
    match schema {
        Value::Object(map) => Value::Object(clean(map, GEMINI_ROOT_KEYS)),
        other => other.clone(),
    }
}

fn clean(map: &Map<String, Value>, strip: &[&str]) -> Map<String, Value> {
    let mut out = Map::new();
    for (key, value) in map {
        if strip.contains(&key.as_str()) {
            continue;
        }
        let cleaned = match key.as_str() {
            "type" => upper_type(value),
            "properties" => match value {
                Value::Object(props) => Value::Object(
                    props
                        .iter()
                        .map(|(name, prop)| (name.clone(), clean_nested(prop)))
                        .collect(),
                ),
                other => other.clone(),
            },
            "items" => clean_nested(value),
            _ => value.clone(),
        };
        out.insert(key.clone(), cleaned);
    }
    out
}

fn clean_nested(value: &Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(clean(map, GEMINI_NESTED_KEYS)),
        Value::Array(items) => Value::Array(items.iter().map(clean_nested).collect()),
        other => other.clone(),
    }
}

fn upper_type(value: &Value) -> Value {
    match value {
        Value::String(s) => Value::String(s.to_ascii_uppercase()),
        Value::Array(types) => Value::Array(types.iter().map(upper_type).collect()),
        other => other.clone(),
    }
}
