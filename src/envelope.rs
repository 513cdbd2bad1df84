//! The per-request result envelope handed to the response writer.

use crate::types::Document;
use bson::Bson;
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Payload {
    Documents(Vec<Document>),
    Document(Document),
    Count { count: u64 },
    Values(Vec<Bson>),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Envelope {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Payload>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status_code: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_count: Option<u64>,
    /// Document loaded ahead of a non-atomic update or delete.
    #[serde(skip)]
    pub document: Option<Document>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Envelope {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace any previous payload.
    pub fn set_result(&mut self, payload: Payload, status: u16) {
        self.result = Some(payload);
        self.status_code = Some(status);
    }

    pub fn set_status(&mut self, status: u16) {
        self.result = None;
        self.status_code = Some(status);
    }
}
