//! Variables projected from the interpreter's stack
use serde_json::Value;

use crate::types::{DataItem, DataType};

#[derive(Debug, Clone, PartialEq)]
pub enum VariableValue {
    Integer(i64),
    Float(f64),
    String(String),
    Boolean(bool),
    List(Vec<RuntimeVariable>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct RuntimeVariable {
    name: String,
    value: VariableValue,
    /// Handle assigned by the session once the variable is shown to a client
    pub reference: Option<i64>,
    memory: Option<Vec<u8>>,
}

impl RuntimeVariable {
    pub fn new(name: impl Into<String>, value: VariableValue) -> Self {
        Self {
            name: name.into(),
            value,
            reference: None,
            memory: None,
        }
    }

    /// Interpret a stack slot according to its reported type
    ///
    /// Values that do not parse as their declared type are kept as strings.
    pub fn from_data_item(name: impl Into<String>, item: &DataItem) -> Self {
        Self::new(name, parse_value(&item.r#type, &item.value))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn value(&self) -> &VariableValue {
        &self.value
    }

    pub fn set_value(&mut self, value: VariableValue) {
        self.value = value;
        self.memory = None;
    }

    /// Bytes of a string value, materialised on first access
    pub fn memory(&mut self) -> Option<&[u8]> {
        if self.memory.is_none() {
            if let VariableValue::String(s) = &self.value {
                self.memory = Some(s.as_bytes().to_vec());
            }
        }
        self.memory.as_deref()
    }

    /// Whether the variable can be viewed as memory
    pub fn has_memory(&self) -> bool {
        self.memory.is_some() || matches!(self.value, VariableValue::String(_))
    }
}

fn parse_value(r#type: &DataType, raw: &str) -> VariableValue {
    let parsed = match r#type {
        DataType::Int | DataType::Byte => raw.trim().parse().ok().map(VariableValue::Integer),
        DataType::Float => raw.trim().parse().ok().map(VariableValue::Float),
        DataType::Boolean => match raw.trim().to_ascii_lowercase().as_str() {
            "true" => Some(VariableValue::Boolean(true)),
            "false" => Some(VariableValue::Boolean(false)),
            _ => None,
        },
        DataType::List => parse_list(raw),
        DataType::Char
        | DataType::String
        | DataType::Struct
        | DataType::Runtime
        | DataType::Other(_) => None,
    };
    parsed.unwrap_or_else(|| VariableValue::String(raw.to_string()))
}

fn parse_list(raw: &str) -> Option<VariableValue> {
    let Ok(Value::Array(items)) = serde_json::from_str::<Value>(raw) else {
        return None;
    };
    let children = items
        .into_iter()
        .enumerate()
        .map(|(i, item)| RuntimeVariable::new(format!("[{i}]"), json_value(item)))
        .collect();
    Some(VariableValue::List(children))
}

fn json_value(value: Value) -> VariableValue {
    match value {
        Value::Bool(b) => VariableValue::Boolean(b),
        Value::Number(n) => match n.as_i64() {
            Some(i) => VariableValue::Integer(i),
            None => VariableValue::Float(n.as_f64().unwrap_or_default()),
        },
        Value::String(s) => VariableValue::String(s),
        Value::Array(items) => VariableValue::List(
            items
                .into_iter()
                .enumerate()
                .map(|(i, item)| RuntimeVariable::new(format!("[{i}]"), json_value(item)))
                .collect(),
        ),
        other @ (Value::Null | Value::Object(_)) => VariableValue::String(other.to_string()),
    }
}
