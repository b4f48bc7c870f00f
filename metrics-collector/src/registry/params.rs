//! Typed extract parameters built from untyped maps.
//!
//! Each extract component declares a [`ParamSchema`] at registration time.
//! [`ParamSchema::build`] turns a flat key/value map (configuration file, user
//! input) into [`ExtractParams`], dropping unknown keys and rejecting missing
//! required ones.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::errors::ParamError;

/// Untyped parameters as supplied by configuration or user input.
pub type RawParams = BTreeMap<String, serde_json::Value>;

/// Primitive kind of a parameter field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParamKind {
    /// A string.
    Text,
    /// A whole number.
    Integer,
    /// A floating point number.
    Float,
}

impl fmt::Display for ParamKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Text => write!(f, "text"),
            Self::Integer => write!(f, "integer"),
            Self::Float => write!(f, "float"),
        }
    }
}

/// A single declared constructor input.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParamField {
    /// Field name as it appears in raw maps.
    pub name: String,
    /// Expected kind.
    pub kind: ParamKind,
    /// Whether the field must be supplied.
    pub required: bool,
    /// Value used when an optional field is absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<ParamValue>,
}

/// A typed parameter value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    /// Whole number.
    Integer(i64),
    /// Floating point number.
    Float(f64),
    /// String.
    Text(String),
}

impl ParamValue {
    fn to_json(&self) -> serde_json::Value {
        match self {
            Self::Integer(i) => serde_json::Value::from(*i),
            Self::Float(f) => serde_json::Value::from(*f),
            Self::Text(s) => serde_json::Value::from(s.clone()),
        }
    }
}

/// Declared fields of an extract component's parameter record.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ParamSchema {
    fields: Vec<ParamField>,
}

impl ParamSchema {
    /// Creates an empty schema.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Declares a required field.
    #[must_use]
    pub fn required(mut self, name: impl Into<String>, kind: ParamKind) -> Self {
        self.fields.push(ParamField {
            name: name.into(),
            kind,
            required: true,
            default: None,
        });
        self
    }

    /// Declares an optional field with an optional default.
    #[must_use]
    pub fn optional(
        mut self,
        name: impl Into<String>,
        kind: ParamKind,
        default: Option<ParamValue>,
    ) -> Self {
        self.fields.push(ParamField {
            name: name.into(),
            kind,
            required: false,
            default,
        });
        self
    }

    /// Declared fields in declaration order.
    #[must_use]
    pub fn fields(&self) -> &[ParamField] {
        &self.fields
    }

    /// Builds typed parameters for `component` from `raw`.
    ///
    /// Keys the schema does not declare are ignored. A `null` value counts as
    /// absent. Numbers given as strings and integers given where a float is
    /// expected are coerced.
    pub fn build(&self, component: &str, raw: &RawParams) -> Result<ExtractParams, ParamError> {
        let mut values = BTreeMap::new();
        for field in &self.fields {
            match raw.get(&field.name).filter(|v| !v.is_null()) {
                Some(value) => {
                    let typed = coerce(field.kind, value).ok_or_else(|| ParamError::InvalidType {
                        component: component.to_string(),
                        field: field.name.clone(),
                        expected: field.kind,
                        found: value.to_string(),
                    })?;
                    values.insert(field.name.clone(), typed);
                }
                None if field.required => {
                    return Err(ParamError::Missing {
                        component: component.to_string(),
                        field: field.name.clone(),
                    });
                }
                None => {
                    if let Some(default) = &field.default {
                        values.insert(field.name.clone(), default.clone());
                    }
                }
            }
        }
        Ok(ExtractParams(values))
    }
}

fn coerce(kind: ParamKind, value: &serde_json::Value) -> Option<ParamValue> {
    use serde_json::Value;
    match (kind, value) {
        (ParamKind::Text, Value::String(s)) => Some(ParamValue::Text(s.clone())),
        (ParamKind::Text, Value::Number(n)) => Some(ParamValue::Text(n.to_string())),
        (ParamKind::Text, Value::Bool(b)) => Some(ParamValue::Text(b.to_string())),
        (ParamKind::Integer, Value::Number(n)) => n.as_i64().map(ParamValue::Integer),
        (ParamKind::Integer, Value::String(s)) => s.trim().parse().ok().map(ParamValue::Integer),
        (ParamKind::Float, Value::Number(n)) => n.as_f64().map(ParamValue::Float),
        (ParamKind::Float, Value::String(s)) => s.trim().parse().ok().map(ParamValue::Float),
        _ => None,
    }
}

/// Validated parameters of one extract component.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExtractParams(BTreeMap<String, ParamValue>);

impl ExtractParams {
    /// Returns a field as text.
    #[must_use]
    pub fn text(&self, name: &str) -> Option<&str> {
        match self.0.get(name) {
            Some(ParamValue::Text(s)) => Some(s),
            _ => None,
        }
    }

    /// Returns a field as an integer.
    #[must_use]
    pub fn integer(&self, name: &str) -> Option<i64> {
        match self.0.get(name) {
            Some(ParamValue::Integer(i)) => Some(*i),
            _ => None,
        }
    }

    /// Returns a field as a float, widening integers.
    #[must_use]
    pub fn float(&self, name: &str) -> Option<f64> {
        match self.0.get(name) {
            Some(ParamValue::Float(f)) => Some(*f),
            #[allow(clippy::cast_precision_loss)]
            Some(ParamValue::Integer(i)) => Some(*i as f64),
            _ => None,
        }
    }

    /// Returns the raw typed value.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&ParamValue> {
        self.0.get(name)
    }

    /// True when no field is set.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Renders the parameters back into an untyped map.
    #[must_use]
    pub fn to_raw(&self) -> RawParams {
        self.0
            .iter()
            .map(|(k, v)| (k.clone(), v.to_json()))
            .collect()
    }
}
