use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::alias::resolve_field;
use crate::operation::{OperationContext, Selection, TYPENAME, is_included, runtime_type};

/// One element of a concrete response path.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PathSegment {
    Key(String),
    Index(usize),
}

impl From<&str> for PathSegment {
    fn from(key: &str) -> Self {
        PathSegment::Key(key.to_string())
    }
}

impl From<usize> for PathSegment {
    fn from(index: usize) -> Self {
        PathSegment::Index(index)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GraphQLError {
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<Vec<PathSegment>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extensions: Option<Map<String, Value>>,
}

impl GraphQLError {
    pub fn new(message: impl Into<String>) -> Self {
        GraphQLError {
            message: message.into(),
            path: None,
            extensions: None,
        }
    }

    pub fn with_path(mut self, path: Vec<PathSegment>) -> Self {
        self.path = Some(path);
        self
    }

    pub fn with_extension(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.extensions
            .get_or_insert_with(Map::new)
            .insert(key.to_string(), value.into());
        self
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct ExecutionResponse {
    pub data: Option<Value>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<GraphQLError>,
    #[serde(skip_serializing_if = "Map::is_empty")]
    pub extensions: Map<String, Value>,
}

impl ExecutionResponse {
    pub fn from_errors(errors: Vec<GraphQLError>) -> Self {
        ExecutionResponse {
            data: None,
            errors,
            extensions: Map::new(),
        }
    }
}

/// Deep structural merge of `source` into `target`.
///
/// Nulls never overwrite existing data; conflicting scalars keep the last write.
pub fn deep_merge(target: &mut Value, source: Value) {
    match (target, source) {
        (_, Value::Null) => {}
        (Value::Object(target), Value::Object(source)) => {
            for (key, value) in source {
                match target.get_mut(&key) {
                    Some(existing) => deep_merge(existing, value),
                    None => {
                        target.insert(key, value);
                    }
                }
            }
        }
        (Value::Array(target), Value::Array(source)) => {
            for (index, value) in source.into_iter().enumerate() {
                match target.get_mut(index) {
                    Some(existing) => deep_merge(existing, value),
                    None => target.push(value),
                }
            }
        }
        (target, source) => *target = source,
    }
}

/// Merges `value` at `path`, creating the objects and list slots on the way.
pub fn insert_at(target: &mut Value, path: &[PathSegment], value: Value) {
    let Some((segment, rest)) = path.split_first() else {
        deep_merge(target, value);
        return;
    };
    match segment {
        PathSegment::Key(key) => {
            if !target.is_object() {
                *target = Value::Object(Map::new());
            }
            if let Value::Object(map) = target {
                insert_at(map.entry(key.clone()).or_insert(Value::Null), rest, value);
            }
        }
        PathSegment::Index(index) => {
            if !target.is_array() {
                *target = Value::Array(Vec::new());
            }
            if let Value::Array(items) = target {
                if items.len() <= *index {
                    items.resize(*index + 1, Value::Null);
                }
                insert_at(&mut items[*index], rest, value);
            }
        }
    }
}

/// Projects merged backend data onto the operation's selection set.
///
/// Keys come out in request order, fields only the gateway asked for are
/// dropped and missing fields become `null`.
pub fn format_response(context: &OperationContext, data: &Value, variables: &Map<String, Value>) -> Value {
    let empty = Map::new();
    let source = data.as_object().unwrap_or(&empty);
    let formatter = Formatter { context, variables };
    let mut out = Map::new();
    formatter.project(&context.root_type, &context.selections, source, &mut out);
    Value::Object(out)
}

struct Formatter<'a> {
    context: &'a OperationContext,
    variables: &'a Map<String, Value>,
}

impl Formatter<'_> {
    fn project(&self, parent_type: &str, selections: &[Selection], source: &Map<String, Value>, out: &mut Map<String, Value>) {
        let schema = &self.context.schema;
        for selection in selections {
            match selection {
                Selection::Field(field) => {
                    if !is_included(&field.directives, self.variables) {
                        continue;
                    }
                    let key = field.response_key();
                    if field.name == TYPENAME {
                        let typename = resolve_field(key, &field.name, source)
                            .cloned()
                            .unwrap_or_else(|| Value::String(parent_type.to_string()));
                        out.insert(key.to_string(), typename);
                        continue;
                    }

                    let raw = resolve_field(key, &field.name, source).cloned().unwrap_or(Value::Null);
                    let value = match schema.field(parent_type, &field.name) {
                        Some(definition) if !field.selections.is_empty() => {
                            self.complete(&definition.ty.name, &field.selections, raw)
                        }
                        _ => raw,
                    };
                    match out.get_mut(key) {
                        Some(existing) => deep_merge(existing, value),
                        None => {
                            out.insert(key.to_string(), value);
                        }
                    }
                }
                Selection::InlineFragment(fragment) => {
                    let object_type = runtime_type(source).unwrap_or(parent_type);
                    if schema.type_matches(object_type, &fragment.type_condition) {
                        self.project(&fragment.type_condition, &fragment.selections, source, out);
                    }
                }
            }
        }
    }

    fn complete(&self, type_name: &str, selections: &[Selection], raw: Value) -> Value {
        match raw {
            Value::Object(object) => {
                let object_type = runtime_type(&object)
                    .filter(|name| self.context.schema.is_composite(name))
                    .unwrap_or(type_name)
                    .to_string();
                let mut out = Map::new();
                self.project(&object_type, selections, &object, &mut out);
                Value::Object(out)
            }
            Value::Array(items) => Value::Array(
                items
                    .into_iter()
                    .map(|item| self.complete(type_name, selections, item))
                    .collect(),
            ),
            other => other,
        }
    }
}
