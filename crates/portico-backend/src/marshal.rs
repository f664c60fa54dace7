// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Schema-driven marshalling between JSON value trees and the backend's
//! object model.
//!
//! The engine walks a field-spec list depth-first against the keyed value
//! tree, invoking setter/getter/iterator calls on one object handle.
//! Coercion rules per kind:
//!
//! | Kind | Input direction | Output direction |
//! |------|-----------------|------------------|
//! | string | passthrough | passthrough |
//! | real | comma→dot, parse; unparsable skips the setter | text parsed back to a number |
//! | integer | text parsed; unparsable skips | text parsed back |
//! | boolean | true/false tokens, else 0/non-zero | same |
//! | date | free-form → `dd.MM.yyyy` | free-form → `yyyy-MM-dd` |
//! | datetime | free-form → `dd.MM.yyyy HH:mm:ss` | free-form → `yyyy-MM-dd HH:mm:ss+04:00` |
//! | array | per element: recurse, then iterator call | iterator until "no more", collect each row |
//! | hash | iterator first (if any), then recurse | same |
//! | blob | ownership check, resolve exchange path | export file, return composite id |
//! | enum | token → ordinal | ordinal → token |
//!
//! Unparsable dates yield an empty string rather than failing; the backend
//! treats empty as "not set".

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use portico_schema::{FieldKind, FieldSpec, SchemaModel};
use serde_json::{Number, Value, json};
use thiserror::Error;
use tracing::debug;

use crate::blob::ExchangeDir;
use crate::client::{BackendCallError, BackendObject};

/// Failures raised by the marshalling engine.
///
/// Everything except `Call` is recoverable and caller-facing: the message
/// goes back to the client and the session stays usable. `Call` wraps a
/// backend failure and is unclassified, hence fatal for the connection.
#[derive(Debug, Error)]
pub enum MarshalError {
    #[error("missing mandatory field: {field}")]
    MissingField { field: String },

    #[error("field {field}: expected {expected}")]
    Shape {
        field: String,
        expected: &'static str,
    },

    #[error("field {field}: unknown enum value '{token}'")]
    EnumValue { field: String, token: String },

    #[error("field {field}: unknown enum type '{name}'")]
    EnumType { field: String, name: String },

    #[error("blob reference '{reference}' is not owned by the caller")]
    BlobAccess { reference: String },

    #[error("blob reference '{reference}' is malformed")]
    BlobMalformed { reference: String },

    #[error("blob '{reference}' not found in exchange directory")]
    BlobMissing { reference: String },

    #[error("blob export failed: {message}")]
    BlobIo { message: String },

    #[error(transparent)]
    Call(#[from] BackendCallError),
}

impl MarshalError {
    /// Validation-warning class: the request was understood but rejected.
    pub fn is_validation(&self) -> bool {
        matches!(self, MarshalError::MissingField { .. })
    }

    /// Unclassified backend failure; the owning connection must be recycled.
    pub fn is_fatal(&self) -> bool {
        matches!(self, MarshalError::Call(_))
    }
}

/// Read-only context shared by one request's marshalling calls.
pub struct MarshalCtx<'a> {
    pub model: &'a SchemaModel,
    pub exchange: &'a ExchangeDir,
    pub owner_id: &'a str,
}

/// Walk `specs` against `params`, setting each present field on `object`.
pub fn marshal_input(
    ctx: &MarshalCtx<'_>,
    object: &mut dyn BackendObject,
    specs: &[FieldSpec],
    params: &Value,
) -> Result<(), MarshalError> {
    for spec in specs {
        let value = params.get(&spec.name).filter(|v| !v.is_null());
        let Some(value) = value else {
            if spec.mandatory {
                return Err(MarshalError::MissingField {
                    field: spec.name.clone(),
                });
            }
            continue;
        };
        marshal_field(ctx, object, spec, value)?;
    }
    Ok(())
}

fn marshal_field(
    ctx: &MarshalCtx<'_>,
    object: &mut dyn BackendObject,
    spec: &FieldSpec,
    value: &Value,
) -> Result<(), MarshalError> {
    match &spec.kind {
        FieldKind::Array => {
            let Value::Array(items) = value else {
                return Err(MarshalError::Shape {
                    field: spec.name.clone(),
                    expected: "array",
                });
            };
            for item in items {
                marshal_input(ctx, object, &spec.content, item)?;
                // Advance the backend cursor after each element; repeating
                // structures are built by repeated set+advance, not bulk
                // assignment.
                if !spec.iterator.is_empty() {
                    object.call(&spec.iterator, &[])?;
                }
            }
            Ok(())
        }
        FieldKind::Hash => {
            if !value.is_object() {
                return Err(MarshalError::Shape {
                    field: spec.name.clone(),
                    expected: "object",
                });
            }
            // Select the sub-record before descending into it
            if !spec.iterator.is_empty() {
                object.call(&spec.iterator, &[])?;
            }
            marshal_input(ctx, object, &spec.content, value)
        }
        FieldKind::Blob => {
            let Value::String(reference) = value else {
                return Err(MarshalError::Shape {
                    field: spec.name.clone(),
                    expected: "blob reference string",
                });
            };
            let path = ctx.exchange.resolve(reference, ctx.owner_id)?;
            set_field(object, spec, json!(path.display().to_string()))
        }
        FieldKind::Enum(enum_name) => {
            let Value::String(token) = value else {
                // Non-string enum values pass through untranslated
                return set_field(object, spec, value.clone());
            };
            if token.is_empty() {
                return set_field(object, spec, value.clone());
            }
            let table =
                ctx.model
                    .enum_table(enum_name)
                    .ok_or_else(|| MarshalError::EnumType {
                        field: spec.name.clone(),
                        name: enum_name.clone(),
                    })?;
            let index = table
                .index_of(token)
                .ok_or_else(|| MarshalError::EnumValue {
                    field: spec.name.clone(),
                    token: token.clone(),
                })?;
            set_field(object, spec, json!(index))
        }
        _ => match coerce_input(spec, value) {
            Some(coerced) => set_field(object, spec, coerced),
            None => {
                debug!(field = %spec.name, kind = %spec.kind, "Unparsable value, setter skipped");
                Ok(())
            }
        },
    }
}

fn set_field(
    object: &mut dyn BackendObject,
    spec: &FieldSpec,
    value: Value,
) -> Result<(), MarshalError> {
    if spec.setter.is_empty() {
        return Ok(());
    }
    object.call(&spec.setter, &[value])?;
    Ok(())
}

/// Scalar input coercion. `None` means the setter call is silently skipped.
fn coerce_input(spec: &FieldSpec, value: &Value) -> Option<Value> {
    match &spec.kind {
        FieldKind::Real => match value {
            Value::String(s) => s
                .replace(',', ".")
                .trim()
                .parse::<f64>()
                .ok()
                .and_then(Number::from_f64)
                .map(Value::Number),
            _ => Some(value.clone()),
        },
        FieldKind::Integer => match value {
            Value::String(s) => s.trim().parse::<i64>().ok().map(|i| json!(i)),
            _ => Some(value.clone()),
        },
        FieldKind::Boolean => match value {
            Value::Bool(_) => Some(value.clone()),
            Value::String(s) => match s.as_str() {
                "true" => Some(json!(true)),
                "false" => Some(json!(false)),
                other => other.trim().parse::<i64>().ok().map(|i| json!(i != 0)),
            },
            Value::Number(n) => n.as_f64().map(|f| json!(f != 0.0)),
            _ => None,
        },
        FieldKind::Date => Some(json!(reformat_datetime(value, "%d.%m.%Y"))),
        FieldKind::DateTime => Some(json!(reformat_datetime(value, "%d.%m.%Y %H:%M:%S"))),
        // string and any remaining kind: passthrough
        _ => Some(value.clone()),
    }
}

/// Collect the declared output fields from `object` into a keyed tree.
pub fn collect_output(
    ctx: &MarshalCtx<'_>,
    object: &mut dyn BackendObject,
    specs: &[FieldSpec],
) -> Result<Value, MarshalError> {
    let mut out = serde_json::Map::new();
    for spec in specs {
        if let Some(value) = collect_field(ctx, object, spec)? {
            out.insert(spec.name.clone(), value);
        }
    }
    Ok(Value::Object(out))
}

fn collect_field(
    ctx: &MarshalCtx<'_>,
    object: &mut dyn BackendObject,
    spec: &FieldSpec,
) -> Result<Option<Value>, MarshalError> {
    match &spec.kind {
        FieldKind::Array => {
            let mut items = Vec::new();
            if !spec.iterator.is_empty() {
                loop {
                    let more = object.call(&spec.iterator, &[])?;
                    if !truthy(&more) {
                        break;
                    }
                    items.push(collect_output(ctx, object, &spec.content)?);
                }
            }
            Ok(Some(Value::Array(items)))
        }
        FieldKind::Hash => {
            if !spec.iterator.is_empty() {
                object.call(&spec.iterator, &[])?;
            }
            Ok(Some(collect_output(ctx, object, &spec.content)?))
        }
        _ => {
            if spec.getter.is_empty() {
                return Ok(None);
            }
            let raw = object.call(&spec.getter, &[])?;
            coerce_output(ctx, spec, raw).map(Some)
        }
    }
}

fn coerce_output(
    ctx: &MarshalCtx<'_>,
    spec: &FieldSpec,
    raw: Value,
) -> Result<Value, MarshalError> {
    match &spec.kind {
        FieldKind::Integer => Ok(match &raw {
            Value::String(s) => s.trim().parse::<i64>().map(|i| json!(i)).unwrap_or(raw),
            _ => raw,
        }),
        FieldKind::Real => Ok(match &raw {
            Value::String(s) => s
                .replace(',', ".")
                .trim()
                .parse::<f64>()
                .ok()
                .and_then(Number::from_f64)
                .map(Value::Number)
                .unwrap_or(raw),
            _ => raw,
        }),
        FieldKind::Boolean => Ok(match &raw {
            Value::Bool(_) => raw,
            Value::Number(n) => json!(n.as_f64().map(|f| f != 0.0).unwrap_or(false)),
            Value::String(s) => match s.as_str() {
                "true" => json!(true),
                "false" => json!(false),
                other => other
                    .trim()
                    .parse::<i64>()
                    .map(|i| json!(i != 0))
                    .unwrap_or(raw),
            },
            _ => raw,
        }),
        FieldKind::Date => Ok(json!(reformat_datetime(&raw, "%Y-%m-%d"))),
        FieldKind::DateTime => {
            let formatted = reformat_datetime(&raw, "%Y-%m-%d %H:%M:%S");
            if formatted.is_empty() {
                Ok(json!(""))
            } else {
                // Fixed offset by contract; callers expect the literal zone
                Ok(json!(format!("{formatted}+04:00")))
            }
        }
        FieldKind::Enum(enum_name) => {
            match &raw {
                Value::String(s) if s.is_empty() => return Ok(raw),
                _ => {}
            }
            let table =
                ctx.model
                    .enum_table(enum_name)
                    .ok_or_else(|| MarshalError::EnumType {
                        field: spec.name.clone(),
                        name: enum_name.clone(),
                    })?;
            let index = match &raw {
                Value::Number(n) => n.as_u64().map(|i| i as usize),
                Value::String(s) => s.trim().parse::<usize>().ok(),
                _ => None,
            };
            let token = index.and_then(|i| table.token_at(i)).ok_or_else(|| {
                MarshalError::EnumValue {
                    field: spec.name.clone(),
                    token: render_text(&raw),
                }
            })?;
            Ok(json!(token))
        }
        FieldKind::Blob => {
            let Some(path) = raw.as_str() else {
                return Err(MarshalError::Shape {
                    field: spec.name.clone(),
                    expected: "file path string",
                });
            };
            if path.is_empty() {
                return Ok(json!(""));
            }
            let id = ctx
                .exchange
                .export(std::path::Path::new(path), ctx.owner_id)?;
            Ok(json!(id))
        }
        // string and default: passthrough
        _ => Ok(raw),
    }
}

/// Parse free-form date/datetime text and render it with `pattern`.
/// Unparsable input yields the empty string.
fn reformat_datetime(value: &Value, pattern: &str) -> String {
    let text = render_text(value);
    match parse_flexible(&text) {
        Some(dt) => dt.format(pattern).to_string(),
        None => String::new(),
    }
}

fn parse_flexible(text: &str) -> Option<NaiveDateTime> {
    let text = text.trim();
    if text.is_empty() {
        return None;
    }
    const DATETIME_LAYOUTS: [&str; 4] = [
        "%Y-%m-%d %H:%M:%S",
        "%Y-%m-%dT%H:%M:%S",
        "%d.%m.%Y %H:%M:%S",
        "%d.%m.%Y %H:%M",
    ];
    for layout in DATETIME_LAYOUTS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(text, layout) {
            return Some(dt);
        }
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
        return Some(dt.naive_local());
    }
    const DATE_LAYOUTS: [&str; 3] = ["%Y-%m-%d", "%d.%m.%Y", "%d/%m/%Y"];
    for layout in DATE_LAYOUTS {
        if let Ok(d) = NaiveDate::parse_from_str(text, layout) {
            return d.and_hms_opt(0, 0, 0);
        }
    }
    None
}

fn render_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        _ => String::new(),
    }
}

fn truthy(value: &Value) -> bool {
    match value {
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(false),
        Value::String(s) => s == "true" || s.trim().parse::<i64>().map(|i| i != 0).unwrap_or(false),
        _ => false,
    }
}
