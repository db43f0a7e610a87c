//! Constants as served by `/api/configure/constants`
//!
//! A constant holds one value (undated, `single`) or a history of dated
//! values. Each value is either a scalar or a composite record of named
//! fields. Composite field types are inferred from the first value so that
//! text typed into the editor can be converted back before saving.

use chrono::Local;
use scraper::Html;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Number, Value};
use std::collections::BTreeMap;

pub const CONSTANTS_URL: &str = "/api/configure/constants";
pub const CONSTANT_URL: &str = "/api/configure/constant";
pub const DELETE_CONSTANT_URL: &str = "/api/configure/delete-constant";

/// Format of entry times (matches the server's day-time format)
pub const FMT_DAY_TIME: &str = "%Y-%m-%d %H:%M:%S";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FieldType {
    Text,
    Number,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConstantEntry {
    #[serde(default)]
    pub value: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time: Option<String>,
    #[serde(default)]
    pub statistic: i64,
}

impl ConstantEntry {
    fn blank(value: Value) -> Self {
        Self {
            value,
            time: Some(now()),
            statistic: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Constant {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub single: bool,
    #[serde(default)]
    pub values: Vec<ConstantEntry>,

    // Derived client-side by `annotate`, never sent
    #[serde(skip)]
    pub composite: bool,
    #[serde(skip)]
    pub types: BTreeMap<String, FieldType>,
}

pub fn is_text(value: &Value) -> bool {
    value.is_string()
}

/// Numbers, plus anything that reads as one: numeric strings, null and
/// booleans. Only arrays, objects and other text are not numbers.
pub fn is_number(value: &Value) -> bool {
    match value {
        Value::Number(_) | Value::Null | Value::Bool(_) => true,
        Value::String(s) => s.trim().parse::<f64>().is_ok(),
        Value::Array(_) | Value::Object(_) => false,
    }
}

pub fn is_composite(value: &Value) -> bool {
    !(is_text(value) || is_number(value))
}

fn now() -> String {
    Local::now().format(FMT_DAY_TIME).to_string()
}

impl Constant {
    /// Work out whether values are composite and record field types
    pub fn annotate(&mut self) {
        self.composite = self
            .values
            .first()
            .map(|entry| is_composite(&entry.value))
            .unwrap_or(false);
        self.types.clear();

        if self.composite {
            if let Some(Value::Object(fields)) = self.values.first().map(|e| &e.value) {
                self.types = fields
                    .iter()
                    .map(|(name, value)| {
                        let kind = if is_text(value) { FieldType::Text } else { FieldType::Number };
                        (name.clone(), kind)
                    })
                    .collect();
            }
        }
    }

    /// Undated constants always show one editable entry
    pub fn ensure_value(&mut self) {
        if self.single && self.values.is_empty() {
            self.values.push(ConstantEntry::blank(Value::String(String::new())));
        }
    }

    /// Coerce composite fields back to their recorded types before sending
    pub fn convert_types(&self) -> Constant {
        let mut converted = self.clone();
        if converted.composite {
            for entry in &mut converted.values {
                if let Value::Object(fields) = &mut entry.value {
                    for (name, value) in fields.iter_mut() {
                        if let Some(kind) = self.types.get(name) {
                            *value = coerce(value, *kind);
                        }
                    }
                }
            }
        }
        converted
    }

    /// A blank single-entry copy, used as the starting point for a new value
    pub fn empty_copy(&self) -> Constant {
        let mut extra = self.clone();
        let value = match self.values.first().map(|e| &e.value) {
            Some(Value::Object(fields)) if self.composite => {
                let blanked: Map<String, Value> = fields
                    .iter()
                    .map(|(name, value)| {
                        let blank = if is_text(value) { Value::String(String::new()) } else { Value::from(0) };
                        (name.clone(), blank)
                    })
                    .collect();
                Value::Object(blanked)
            }
            _ => Value::String(String::new()),
        };
        extra.values = vec![ConstantEntry::blank(value)];
        extra
    }

    /// Names of the editable fields of an entry (`None` for a scalar value)
    pub fn field_names(&self, index: usize) -> Option<Vec<String>> {
        match self.values.get(index).map(|e| &e.value) {
            Some(Value::Object(fields)) if self.composite => Some(fields.keys().cloned().collect()),
            _ => None,
        }
    }

    /// Text shown for a field (or the whole value when `field` is `None`)
    pub fn field_text(&self, index: usize, field: Option<&str>) -> String {
        let value = self.values.get(index).map(|e| &e.value);
        let value = match (value, field) {
            (Some(Value::Object(fields)), Some(name)) => fields.get(name),
            (value, _) => value,
        };
        match value {
            Some(Value::String(s)) => s.clone(),
            Some(Value::Null) | None => String::new(),
            Some(other) => other.to_string(),
        }
    }

    /// Store edited text for a field (or the whole value when `field` is `None`)
    pub fn set_field_text(&mut self, index: usize, field: Option<&str>, text: String) {
        let Some(entry) = self.values.get_mut(index) else {
            return;
        };
        match (&mut entry.value, field) {
            (Value::Object(fields), Some(name)) => {
                fields.insert(name.to_string(), Value::String(text));
            }
            (value, _) => *value = Value::String(text),
        }
    }

    pub fn set_time(&mut self, index: usize, time: String) {
        if let Some(entry) = self.values.get_mut(index) {
            entry.time = Some(time);
        }
    }

    /// True when the first entry has nothing worth adding
    pub fn first_value_empty(&self) -> bool {
        match self.values.first().map(|e| &e.value) {
            None | Some(Value::Null) => true,
            Some(Value::String(s)) => s.is_empty(),
            _ => false,
        }
    }

    /// Plain-text description (the server sends a little HTML)
    pub fn plain_description(&self) -> String {
        strip_tags(&self.description)
    }
}

fn coerce(value: &Value, kind: FieldType) -> Value {
    match (kind, value) {
        (FieldType::Text, Value::String(_)) => value.clone(),
        (FieldType::Text, Value::Null) => Value::String(String::new()),
        (FieldType::Text, other) => Value::String(other.to_string()),
        (FieldType::Number, Value::Number(_)) => value.clone(),
        (FieldType::Number, Value::String(s)) => parse_number(s),
        (FieldType::Number, Value::Bool(b)) => Value::from(u8::from(*b)),
        (FieldType::Number, _) => Value::Null,
    }
}

/// Integers stay integers; anything unparseable becomes null
fn parse_number(text: &str) -> Value {
    let text = text.trim();
    if text.is_empty() {
        return Value::from(0);
    }
    if let Ok(i) = text.parse::<i64>() {
        return Value::from(i);
    }
    text.parse::<f64>()
        .ok()
        .and_then(Number::from_f64)
        .map(Value::Number)
        .unwrap_or(Value::Null)
}

fn strip_tags(html: &str) -> String {
    let fragment = Html::parse_fragment(html);
    let text: String = fragment.root_element().text().collect();
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Annotate a freshly loaded list of constants
pub fn annotate_all(mut constants: Vec<Constant>) -> Vec<Constant> {
    for constant in &mut constants {
        constant.annotate();
        constant.ensure_value();
    }
    constants
}
