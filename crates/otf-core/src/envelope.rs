//! The envelope published to the broker for every input record.
//!
//! On the wire an envelope is a JSON object with exactly two keys:
//!
//! ```text
//! {
//!   "original": <the source record, byte-for-byte>,
//!   "meta": { "providerName": .., "inputFormat": .., "alignMethod": ..,
//!             "levelMethod": .., "readerName": .., "readerID": ..,
//!             "capability": .. }
//! }
//! ```
//!
//! `original` is carried as a [`RawValue`], so field order, number formatting
//! and whitespace inside the record are never touched.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::value::RawValue;

use crate::error::EnvelopeError;

/// Metadata block attached to every envelope.
///
/// Constant for the life of a reader. Options that were not configured are
/// empty strings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Meta {
    /// Name of the system that produced the data.
    pub provider_name: String,
    /// Input format tag (`csv` or `json`).
    pub input_format: String,
    /// Alignment method tag.
    pub align_method: String,
    /// Leveling method tag.
    pub level_method: String,
    /// Name of the reader that published the record.
    pub reader_name: String,
    /// Id of the reader that published the record.
    #[serde(rename = "readerID")]
    pub reader_id: String,
    /// Capability tag.
    pub capability: String,
}

#[derive(Serialize)]
struct WireRef<'a> {
    original: &'a RawValue,
    meta: &'a Meta,
}

#[derive(Deserialize)]
struct WireOwned {
    original: Box<RawValue>,
    meta: Meta,
}

/// One record wrapped with reader metadata.
///
/// Built fresh per record and never mutated; the [`Meta`] is shared between
/// all envelopes of a reader.
#[derive(Debug, Clone)]
pub struct Envelope {
    original: Box<RawValue>,
    meta: Arc<Meta>,
}

impl Envelope {
    /// Wraps a raw record.
    #[must_use]
    pub fn new(original: Box<RawValue>, meta: Arc<Meta>) -> Self {
        Self { original, meta }
    }

    /// The source record exactly as it was read.
    #[must_use]
    pub fn original(&self) -> &RawValue {
        &self.original
    }

    /// The metadata block.
    #[must_use]
    pub fn meta(&self) -> &Meta {
        &self.meta
    }

    /// Serializes the envelope to its JSON wire form.
    pub fn to_bytes(&self) -> Result<Vec<u8>, EnvelopeError> {
        serde_json::to_vec(&WireRef {
            original: &self.original,
            meta: &self.meta,
        })
        .map_err(EnvelopeError::Encode)
    }

    /// Parses an envelope from its JSON wire form.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, EnvelopeError> {
        let wire: WireOwned = serde_json::from_slice(bytes).map_err(EnvelopeError::Decode)?;
        Ok(Self {
            original: wire.original,
            meta: Arc::new(wire.meta),
        })
    }
}
