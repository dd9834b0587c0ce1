use std::fmt;

use serde::Serialize;
use serde_json::Value;

use crate::api::IngestError;

const PATIENT: &str = "patient";
const EPISODE: &str = "episode";
const ID: &str = "id";

/// An MTB file as received on the intake endpoint.
///
/// Only `patient.id` and `episode.id` are interpreted. The rest of the
/// document is kept as parsed and written back verbatim, in its original
/// key order, when the record is encoded for Kafka.
#[derive(Debug, Clone, PartialEq)]
pub struct MtbFile(Value);

impl MtbFile {
    /// Parses a request body. Any well-formed JSON is accepted here, required
    /// fields are checked separately by [`MtbFile::validate`].
    pub fn from_slice(body: &[u8]) -> Result<Self, IngestError> {
        Ok(Self(serde_json::from_slice(body)?))
    }

    pub fn patient_id(&self) -> Option<&Value> {
        self.nested_id(PATIENT)
    }

    pub fn episode_id(&self) -> Option<&Value> {
        self.nested_id(EPISODE)
    }

    /// Returns an error naming the first missing identifier, if any.
    pub fn validate(&self) -> Result<(), IngestError> {
        self.patient_id()
            .ok_or(IngestError::MissingRequiredField("patient.id"))?;
        self.episode_id()
            .ok_or(IngestError::MissingRequiredField("episode.id"))?;
        Ok(())
    }

    /// The patient id as plain text, which is what gets exchanged for a pseudonym.
    /// Scalars render as their text, objects and arrays as an empty string.
    pub fn patient_id_text(&self) -> Option<String> {
        self.patient_id().map(|id| match id {
            Value::String(s) => s.clone(),
            Value::Object(_) | Value::Array(_) => String::new(),
            other => other.to_string(),
        })
    }

    /// Replaces `patient.id`. Fails if the record has no patient object.
    pub fn set_patient_id(&mut self, id: String) -> Result<(), IngestError> {
        let patient = self
            .0
            .get_mut(PATIENT)
            .and_then(Value::as_object_mut)
            .ok_or(IngestError::MissingRequiredField("patient.id"))?;
        drop(patient.insert(ID.to_owned(), Value::String(id)));
        Ok(())
    }

    /// Derives the Kafka message key from the identifiers as they currently
    /// stand in the record.
    pub fn routing_key(&self) -> Result<RoutingKey, IngestError> {
        let pid = self
            .patient_id()
            .ok_or(IngestError::MissingRequiredField("patient.id"))?;
        let eid = self
            .episode_id()
            .ok_or(IngestError::MissingRequiredField("episode.id"))?;
        RoutingKey::new(pid, eid)
    }

    pub fn to_json(&self) -> Result<String, IngestError> {
        serde_json::to_string(&self.0).map_err(|e| IngestError::RecordEncodingError(e.to_string()))
    }

    pub fn as_value(&self) -> &Value {
        &self.0
    }

    fn nested_id(&self, parent: &str) -> Option<&Value> {
        self.0
            .get(parent)
            .and_then(|p| p.get(ID))
            .filter(|id| !id.is_null())
    }
}

impl From<Value> for MtbFile {
    fn from(value: Value) -> Self {
        Self(value)
    }
}

#[derive(Serialize)]
struct KeyFields<'a> {
    pid: &'a Value,
    eid: &'a Value,
}

/// Kafka message key for an MTB file: `{"pid":<patient id>,"eid":<episode id>}`.
///
/// Both ids are embedded as JSON values, so a string id is quoted and a
/// numeric one is not.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RoutingKey(String);

impl RoutingKey {
    pub fn new(pid: &Value, eid: &Value) -> Result<Self, IngestError> {
        serde_json::to_string(&KeyFields { pid, eid })
            .map(RoutingKey)
            .map_err(|e| IngestError::RecordEncodingError(e.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RoutingKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
