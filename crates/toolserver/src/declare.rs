//! Model-facing function declarations and remote schema translation.
//!
//! Remote tools describe their parameters with free-form JSON schemas; the
//! model backend wants a closed type system. The translation here covers
//! primitives, one level of array-item typing, and one level of nested
//! object properties with required lists. Anything else collapses to
//! `String` — a documented limitation of the declaration model, not a bug.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::protocol::Tool;

/// Parameter type in the model-facing schema system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SchemaType {
    String,
    Number,
    Integer,
    Boolean,
    Array,
    Object,
}

impl SchemaType {
    fn from_remote(name: &str) -> Self {
        match name {
            "string" => Self::String,
            "number" => Self::Number,
            "integer" => Self::Integer,
            "boolean" => Self::Boolean,
            "array" => Self::Array,
            "object" => Self::Object,
            _ => Self::String,
        }
    }
}

/// A parameter schema exposed to the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Schema {
    #[serde(rename = "type")]
    pub schema_type: SchemaType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub items: Option<Box<Schema>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub properties: Option<BTreeMap<String, Schema>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub required: Vec<String>,
}

impl Schema {
    /// A schema of the given type with no further structure.
    pub fn of(schema_type: SchemaType) -> Self {
        Self {
            schema_type,
            description: None,
            items: None,
            properties: None,
            required: Vec::new(),
        }
    }

    /// A string schema with a description.
    pub fn string(description: impl Into<String>) -> Self {
        Self {
            description: Some(description.into()),
            ..Self::of(SchemaType::String)
        }
    }

    /// An object schema with the given properties and required names.
    pub fn object(
        properties: impl IntoIterator<Item = (&'static str, Schema)>,
        required: impl IntoIterator<Item = &'static str>,
    ) -> Self {
        Self {
            properties: Some(
                properties
                    .into_iter()
                    .map(|(k, v)| (k.to_string(), v))
                    .collect(),
            ),
            required: required.into_iter().map(str::to_string).collect(),
            ..Self::of(SchemaType::Object)
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_items(mut self, items: Schema) -> Self {
        self.items = Some(Box::new(items));
        self
    }
}

/// A function declaration exposed to the model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionDeclaration {
    pub name: String,
    pub description: String,
    pub parameters: Schema,
}

impl Tool {
    /// Translate this tool's remote input schema into a model-facing
    /// declaration under the given (qualified) name.
    pub fn to_declaration(&self, name: impl Into<String>) -> FunctionDeclaration {
        FunctionDeclaration {
            name: name.into(),
            description: self.description.clone().unwrap_or_default(),
            parameters: translate_object_schema(&self.input_schema),
        }
    }
}

/// Translate a remote object schema (the root of a tool's input schema).
fn translate_object_schema(schema: &Value) -> Schema {
    let mut root = Schema::of(SchemaType::Object);

    if let Some(properties) = schema.get("properties").and_then(Value::as_object) {
        let mut converted = BTreeMap::new();
        for (name, prop) in properties {
            converted.insert(name.clone(), translate_property(prop));
        }
        root.properties = Some(converted);
    }

    root.required = translate_required(schema.get("required"));
    root
}

fn translate_property(prop: &Value) -> Schema {
    let type_name = prop.get("type").and_then(Value::as_str).unwrap_or("string");
    let mut schema = Schema::of(SchemaType::from_remote(type_name));
    schema.description = prop
        .get("description")
        .and_then(Value::as_str)
        .map(str::to_string);

    match schema.schema_type {
        SchemaType::Array => {
            // One level of item typing; deeper nesting is not carried over.
            if let Some(items) = prop.get("items").and_then(Value::as_object) {
                let item_type = items.get("type").and_then(Value::as_str).unwrap_or("string");
                let mut item = Schema::of(SchemaType::from_remote(item_type));
                item.description = items
                    .get("description")
                    .and_then(Value::as_str)
                    .map(str::to_string);
                schema.items = Some(Box::new(item));
            }
        }
        SchemaType::Object => {
            // One level of nested properties.
            if let Some(properties) = prop.get("properties").and_then(Value::as_object) {
                let mut converted = BTreeMap::new();
                for (name, sub) in properties {
                    let sub_type = sub.get("type").and_then(Value::as_str).unwrap_or("string");
                    let mut sub_schema = Schema::of(SchemaType::from_remote(sub_type));
                    sub_schema.description = sub
                        .get("description")
                        .and_then(Value::as_str)
                        .map(str::to_string);
                    converted.insert(name.clone(), sub_schema);
                }
                schema.properties = Some(converted);
            }
            schema.required = translate_required(prop.get("required"));
        }
        _ => {}
    }

    schema
}

fn translate_required(required: Option<&Value>) -> Vec<String> {
    required
        .and_then(Value::as_array)
        .map(|names| {
            names
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn tool(input_schema: Value) -> Tool {
        Tool {
            name: "search".to_string(),
            description: Some("Search the docs".to_string()),
            input_schema,
        }
    }

    #[test]
    fn translates_primitives_and_required() {
        let decl = tool(json!({
            "type": "object",
            "properties": {
                "q": {"type": "string", "description": "query"},
                "limit": {"type": "integer"},
                "fuzzy": {"type": "boolean"}
            },
            "required": ["q"]
        }))
        .to_declaration("docs_search");

        assert_eq!(decl.name, "docs_search");
        let props = decl.parameters.properties.unwrap();
        assert_eq!(props["q"].schema_type, SchemaType::String);
        assert_eq!(props["q"].description.as_deref(), Some("query"));
        assert_eq!(props["limit"].schema_type, SchemaType::Integer);
        assert_eq!(props["fuzzy"].schema_type, SchemaType::Boolean);
        assert_eq!(decl.parameters.required, vec!["q".to_string()]);
    }

    #[test]
    fn translates_array_items_one_level() {
        let decl = tool(json!({
            "type": "object",
            "properties": {
                "tags": {
                    "type": "array",
                    "items": {"type": "string", "description": "a tag"}
                }
            }
        }))
        .to_declaration("docs_search");

        let props = decl.parameters.properties.unwrap();
        let items = props["tags"].items.as_ref().unwrap();
        assert_eq!(items.schema_type, SchemaType::String);
        assert_eq!(items.description.as_deref(), Some("a tag"));
    }

    #[test]
    fn translates_nested_object_with_required() {
        let decl = tool(json!({
            "type": "object",
            "properties": {
                "filter": {
                    "type": "object",
                    "properties": {
                        "author": {"type": "string"},
                        "year": {"type": "number"}
                    },
                    "required": ["author"]
                }
            }
        }))
        .to_declaration("docs_search");

        let props = decl.parameters.properties.unwrap();
        let filter = &props["filter"];
        assert_eq!(filter.schema_type, SchemaType::Object);
        let nested = filter.properties.as_ref().unwrap();
        assert_eq!(nested["author"].schema_type, SchemaType::String);
        assert_eq!(nested["year"].schema_type, SchemaType::Number);
        assert_eq!(filter.required, vec!["author".to_string()]);
    }

    #[test]
    fn unsupported_types_default_to_string() {
        let decl = tool(json!({
            "type": "object",
            "properties": {
                "blob": {"type": "null"},
                "untyped": {}
            }
        }))
        .to_declaration("docs_search");

        let props = decl.parameters.properties.unwrap();
        assert_eq!(props["blob"].schema_type, SchemaType::String);
        assert_eq!(props["untyped"].schema_type, SchemaType::String);
    }

    #[test]
    fn schema_serializes_with_lowercase_type() {
        let schema = Schema::object([("q", Schema::string("query"))], ["q"]);
        let json = serde_json::to_value(&schema).unwrap();
        assert_eq!(json["type"], "object");
        assert_eq!(json["properties"]["q"]["type"], "string");
        assert_eq!(json["required"][0], "q");
    }
}
