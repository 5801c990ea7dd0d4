use std::collections::BTreeMap;

use bincode::{Decode, Encode};
use serde::{Deserialize, Serialize};

#[derive(Serialize, Deserialize, Encode, Decode, Clone, Debug, PartialEq)]
#[serde(untagged)]
pub enum FieldValue {
    Number(f64),
    Text(String),
}

/// Field map as persisted by the store. Nothing guarantees that a stored
/// document describes a drawable record.
#[derive(Serialize, Deserialize, Encode, Decode, Clone, Debug, Default, PartialEq)]
pub struct Document {
    pub fields: BTreeMap<String, FieldValue>,
}

impl Document {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_number(&mut self, name: &str, value: f64) {
        self.fields
            .insert(name.to_string(), FieldValue::Number(value));
    }

    pub fn set_text(&mut self, name: &str, value: impl Into<String>) {
        self.fields
            .insert(name.to_string(), FieldValue::Text(value.into()));
    }

    pub fn number(&self, name: &str) -> Option<f64> {
        match self.fields.get(name)? {
            FieldValue::Number(value) if value.is_finite() => Some(*value),
            _ => None,
        }
    }

    pub fn text(&self, name: &str) -> Option<&str> {
        match self.fields.get(name)? {
            FieldValue::Text(value) => Some(value),
            FieldValue::Number(_) => None,
        }
    }
}

/// Store-assigned write time. `millis` never decreases within a collection and
/// `seq` breaks ties between writes landing in the same millisecond.
#[derive(
    Serialize,
    Deserialize,
    Encode,
    Decode,
    Clone,
    Copy,
    Debug,
    Default,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
)]
pub struct ServerTime {
    pub millis: u64,
    pub seq: u64,
}

impl ServerTime {
    pub fn new(millis: u64, seq: u64) -> Self {
        Self { millis, seq }
    }

    pub fn document_id(&self) -> String {
        format!("{:013}-{:08}", self.millis, self.seq)
    }
}

#[derive(Serialize, Deserialize, Encode, Decode, Clone, Debug, PartialEq)]
pub struct StoredDocument {
    pub id: String,
    pub server_time: ServerTime,
    pub document: Document,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn number_rejects_text_and_non_finite_values() {
        let mut document = Document::new();
        document.set_number("x", 4.0);
        document.set_number("nan", f64::NAN);
        document.set_text("label", "4");
        assert_eq!(document.number("x"), Some(4.0));
        assert_eq!(document.number("nan"), None);
        assert_eq!(document.number("label"), None);
        assert_eq!(document.number("missing"), None);
        assert_eq!(document.text("label"), Some("4"));
        assert_eq!(document.text("x"), None);
    }

    #[test]
    fn server_time_orders_by_millis_then_seq() {
        let early = ServerTime::new(5, 9);
        let tie = ServerTime::new(6, 1);
        let late = ServerTime::new(6, 2);
        assert!(early < tie);
        assert!(tie < late);
        assert!(tie.document_id() < late.document_id());
    }

    #[test]
    fn document_json_keeps_plain_field_values() {
        let mut document = Document::new();
        document.set_number("size", 5.0);
        document.set_text("color", "#ff0000");
        let json = serde_json::to_string(&document).unwrap();
        assert_eq!(json, r##"{"fields":{"color":"#ff0000","size":5.0}}"##);
    }
}
