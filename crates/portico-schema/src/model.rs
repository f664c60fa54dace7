// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Schema document: methods, field specs, enum tables.
//!
//! The on-disk form is one JSON object:
//!
//! ```json
//! {
//!   "methods": {
//!     "create_order": {
//!       "object": "OrderService",
//!       "input":  [{"name": "qty", "kind": "integer", "setter": "set_qty", "mandatory": true}],
//!       "output": [{"name": "order_id", "kind": "string", "getter": "get_order_id"}]
//!     }
//!   },
//!   "enums": {"Status": ["new", "paid", "shipped"]}
//! }
//! ```
//!
//! Field specs nest through `content` for `array`/`hash` kinds and carry an
//! `iterator` identifier where the backend advances an internal cursor.

use std::collections::HashMap;
use std::path::Path;

use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{info, warn};

use crate::error::SchemaError;

/// Declared type of one field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldKind {
    String,
    Integer,
    Real,
    Boolean,
    Date,
    DateTime,
    Array,
    Hash,
    Blob,
    /// Named enum table, declared as `enum<Name>` in the schema file.
    Enum(String),
}

impl FieldKind {
    /// Parse the schema-file spelling. Returns `None` for unknown kinds.
    pub fn parse(s: &str) -> Option<FieldKind> {
        match s {
            "string" => Some(FieldKind::String),
            "integer" => Some(FieldKind::Integer),
            "real" => Some(FieldKind::Real),
            "boolean" => Some(FieldKind::Boolean),
            "date" => Some(FieldKind::Date),
            "datetime" => Some(FieldKind::DateTime),
            "array" => Some(FieldKind::Array),
            "hash" => Some(FieldKind::Hash),
            "blob" => Some(FieldKind::Blob),
            _ => {
                let name = s.strip_prefix("enum<")?.strip_suffix('>')?;
                if name.is_empty() {
                    None
                } else {
                    Some(FieldKind::Enum(name.to_string()))
                }
            }
        }
    }

    /// The schema-file spelling, used by `describe()`.
    pub fn label(&self) -> String {
        match self {
            FieldKind::String => "string".to_string(),
            FieldKind::Integer => "integer".to_string(),
            FieldKind::Real => "real".to_string(),
            FieldKind::Boolean => "boolean".to_string(),
            FieldKind::Date => "date".to_string(),
            FieldKind::DateTime => "datetime".to_string(),
            FieldKind::Array => "array".to_string(),
            FieldKind::Hash => "hash".to_string(),
            FieldKind::Blob => "blob".to_string(),
            FieldKind::Enum(name) => format!("enum<{name}>"),
        }
    }
}

impl std::fmt::Display for FieldKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.label())
    }
}

/// One parameter or result field. Identifiers left empty mean "no such
/// call on the backend object" (e.g. a hash with no iterator).
#[derive(Debug, Clone, PartialEq)]
pub struct FieldSpec {
    pub name: String,
    pub kind: FieldKind,
    pub setter: String,
    pub getter: String,
    pub mandatory: bool,
    /// Nested specs for `array`/`hash` kinds.
    pub content: Vec<FieldSpec>,
    /// Cursor-advance (input) / cursor-test (output) call name.
    pub iterator: String,
}

/// One callable method: target object class plus ordered field specs.
#[derive(Debug, Clone, PartialEq)]
pub struct MethodSchema {
    pub object_class: String,
    pub input: Vec<FieldSpec>,
    pub output: Vec<FieldSpec>,
}

/// Named ordered token list. The backend speaks ordinals, callers speak
/// tokens; translation happens in both directions by position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnumTable {
    tokens: Vec<String>,
}

impl EnumTable {
    pub fn new(tokens: Vec<String>) -> Self {
        Self { tokens }
    }

    pub fn index_of(&self, token: &str) -> Option<usize> {
        self.tokens.iter().position(|t| t == token)
    }

    pub fn token_at(&self, index: usize) -> Option<&str> {
        self.tokens.get(index).map(String::as_str)
    }

    pub fn tokens(&self) -> &[String] {
        &self.tokens
    }
}

// Raw serde shape of the schema file. Validated into the typed model by
// `SchemaModel::from_value`.

#[derive(Debug, Deserialize)]
struct RawSchema {
    #[serde(default)]
    methods: HashMap<String, RawMethod>,
    #[serde(default)]
    enums: HashMap<String, Vec<String>>,
}

#[derive(Debug, Deserialize)]
struct RawMethod {
    #[serde(default)]
    object: String,
    #[serde(default)]
    input: Vec<RawSpec>,
    #[serde(default)]
    output: Vec<RawSpec>,
}

#[derive(Debug, Deserialize)]
struct RawSpec {
    name: String,
    #[serde(default = "default_kind")]
    kind: String,
    #[serde(default)]
    setter: String,
    #[serde(default)]
    getter: String,
    #[serde(default)]
    mandatory: bool,
    #[serde(default)]
    content: Vec<RawSpec>,
    #[serde(default)]
    iterator: String,
}

fn default_kind() -> String {
    "string".to_string()
}

/// The whole schema document, loaded once and shared read-only.
#[derive(Debug, Clone)]
pub struct SchemaModel {
    methods: HashMap<String, MethodSchema>,
    enums: HashMap<String, EnumTable>,
}

impl SchemaModel {
    /// Load and validate a schema file.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, SchemaError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| SchemaError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let doc: Value = serde_json::from_str(&text)?;
        let model = Self::from_value(doc)?;
        info!(
            path = %path.display(),
            methods = model.methods.len(),
            enums = model.enums.len(),
            "Schema loaded"
        );
        Ok(model)
    }

    /// Validate an already-parsed schema document.
    pub fn from_value(doc: Value) -> Result<Self, SchemaError> {
        let raw: RawSchema = serde_json::from_value(doc)?;

        let enums: HashMap<String, EnumTable> = raw
            .enums
            .into_iter()
            .map(|(name, tokens)| (name, EnumTable::new(tokens)))
            .collect();

        let mut methods = HashMap::new();
        for (name, raw_method) in raw.methods {
            if raw_method.object.is_empty() {
                return Err(SchemaError::MissingObjectClass { method: name });
            }
            let input = build_specs(&name, raw_method.input)?;
            let output = build_specs(&name, raw_method.output)?;
            methods.insert(
                name,
                MethodSchema {
                    object_class: raw_method.object,
                    input,
                    output,
                },
            );
        }

        let model = Self { methods, enums };
        for (method, schema) in &model.methods {
            for spec in schema.input.iter().chain(schema.output.iter()) {
                model.warn_undeclared_enums(method, spec);
            }
        }
        Ok(model)
    }

    fn warn_undeclared_enums(&self, method: &str, spec: &FieldSpec) {
        if let FieldKind::Enum(name) = &spec.kind
            && !self.enums.contains_key(name)
        {
            warn!(
                method = %method,
                field = %spec.name,
                enum_name = %name,
                "Field references an undeclared enum table"
            );
        }
        for nested in &spec.content {
            self.warn_undeclared_enums(method, nested);
        }
    }

    pub fn method(&self, name: &str) -> Option<&MethodSchema> {
        self.methods.get(name)
    }

    pub fn enum_table(&self, name: &str) -> Option<&EnumTable> {
        self.enums.get(name)
    }

    pub fn method_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.methods.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Render the full schema plus enum tables, served as the result of the
    /// describe pseudo-method.
    pub fn describe(&self) -> Value {
        let mut methods = serde_json::Map::new();
        for name in self.method_names() {
            // method_names() only returns existing keys
            if let Some(schema) = self.methods.get(name) {
                methods.insert(
                    name.to_string(),
                    json!({
                        "object": schema.object_class,
                        "input": describe_specs(&schema.input),
                        "output": describe_specs(&schema.output),
                    }),
                );
            }
        }

        let mut enums = serde_json::Map::new();
        let mut enum_names: Vec<&String> = self.enums.keys().collect();
        enum_names.sort_unstable();
        for name in enum_names {
            if let Some(table) = self.enums.get(name) {
                enums.insert(name.clone(), json!(table.tokens()));
            }
        }

        json!({ "methods": methods, "enums": enums })
    }
}

fn build_specs(method: &str, raw: Vec<RawSpec>) -> Result<Vec<FieldSpec>, SchemaError> {
    raw.into_iter()
        .map(|spec| {
            let kind =
                FieldKind::parse(&spec.kind).ok_or_else(|| SchemaError::InvalidKind {
                    method: method.to_string(),
                    field: spec.name.clone(),
                    kind: spec.kind.clone(),
                })?;
            Ok(FieldSpec {
                name: spec.name,
                kind,
                setter: spec.setter,
                getter: spec.getter,
                mandatory: spec.mandatory,
                content: build_specs(method, spec.content)?,
                iterator: spec.iterator,
            })
        })
        .collect()
}

fn describe_specs(specs: &[FieldSpec]) -> Value {
    Value::Array(
        specs
            .iter()
            .map(|spec| {
                let mut entry = serde_json::Map::new();
                entry.insert("name".to_string(), json!(spec.name));
                entry.insert("kind".to_string(), json!(spec.kind.label()));
                entry.insert("mandatory".to_string(), json!(spec.mandatory));
                if !spec.content.is_empty() {
                    entry.insert("content".to_string(), describe_specs(&spec.content));
                }
                Value::Object(entry)
            })
            .collect(),
    )
}
