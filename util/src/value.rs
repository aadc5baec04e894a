//! Positional argument values and their XML representation.

use serde_json::{Map, Value};

use crate::xml::XmlElement;

pub const XSI_NS: &str = "http://www.w3.org/2001/XMLSchema-instance";

/// One positional argument of an operation call.
#[derive(Debug, Clone, PartialEq)]
pub enum Argument {
    Null,
    Int(i32),
    Long(i64),
    Double(f64),
    Float(f32),
    Boolean(bool),
    String(String),

    /// A value passed through without conversion.
    Value(Value),
}

impl Argument {
    /// Elements carrying this argument as a message part named `name`.
    ///
    /// Arrays repeat the element once per item.
    pub fn to_elements(&self, name: &str) -> Vec<XmlElement> {
        let element = XmlElement::new(name);

        let element = match self {
            Self::Null => nil(element),
            Self::Int(value) => element.with_text(value.to_string()),
            Self::Long(value) => element.with_text(value.to_string()),
            Self::Double(value) => element.with_text(value.to_string()),
            Self::Float(value) => element.with_text(value.to_string()),
            Self::Boolean(value) => element.with_text(value.to_string()),
            Self::String(value) => element.with_text(value.as_str()),
            Self::Value(value) => return json_elements(name, value),
        };

        vec![element]
    }
}

impl From<Value> for Argument {
    fn from(value: Value) -> Self {
        match value {
            Value::Null => Self::Null,
            value => Self::Value(value),
        }
    }
}

fn nil(element: XmlElement) -> XmlElement {
    element.with_attribute("xsi:nil", "true")
}

fn json_elements(name: &str, value: &Value) -> Vec<XmlElement> {
    let element = XmlElement::new(name);

    let element = match value {
        Value::Null => nil(element),
        Value::Bool(value) => element.with_text(value.to_string()),
        Value::Number(value) => element.with_text(value.to_string()),
        Value::String(value) => element.with_text(value.as_str()),

        Value::Array(items) => {
            return items
                .iter()
                .flat_map(|item| json_elements(name, item))
                .collect()
        }

        Value::Object(fields) => {
            let mut element = element;
            for (key, value) in fields {
                element.children.extend(json_elements(key, value));
            }
            element
        }
    };

    vec![element]
}

/// Converts a response element into JSON.
///
/// Leaves become strings (or null when marked nil), elements with children
/// become objects keyed by local name, and repeated names collect into an
/// array.
pub fn element_to_json(element: &XmlElement) -> Value {
    if element.children.is_empty() {
        if element.attribute("nil") == Some("true") {
            return Value::Null;
        }

        return Value::String(element.text().unwrap_or_default().to_owned());
    }

    let mut fields = Map::new();
    for child in &element.children {
        let value = element_to_json(child);

        match fields.get_mut(child.local_name()) {
            Some(Value::Array(items)) => items.push(value),
            Some(existing) => {
                let first = existing.take();
                *existing = Value::Array(vec![first, value]);
            }
            None => {
                fields.insert(child.local_name().to_owned(), value);
            }
        }
    }

    Value::Object(fields)
}
