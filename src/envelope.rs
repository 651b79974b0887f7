//! Message envelope: the tagged wire format for everything crossing the
//! worker boundary and everything written to disk.
//!
//! An envelope is a JSON object whose `_type` key names the variant and
//! whose remaining keys are the variant's fields:
//!
//! ```text
//! { "_type": "AnalysisResult",
//!   "target_identity": { "_type": "RepoDescriptor", "full_name": "...", ... },
//!   "success": true,
//!   "line_stats": { "_type": "LineStats", "code": 120, ... },
//!   ... }
//! ```
//!
//! Nested entities are envelopes too, so a decoded value always has its
//! concrete type. The set of variants is closed: decoding consults
//! [`DECODERS`] and an unrecognised tag anywhere in the tree is an
//! [`EnvelopeError::UnknownVariant`].

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::model::{AnalysisResult, AnalysisTarget, LineStats, RepoDescriptor};

/// The key holding the variant tag.
pub const TAG_KEY: &str = "_type";

/// Errors that can occur while encoding or decoding envelopes.
#[derive(Debug, thiserror::Error)]
pub enum EnvelopeError {
    #[error("unknown envelope variant: {0}")]
    UnknownVariant(String),

    #[error("expected a {expected} envelope, found {found}")]
    UnexpectedVariant {
        expected: &'static str,
        found: String,
    },

    #[error("{0} did not serialize to an object")]
    NotAnObject(&'static str),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = core::result::Result<T, EnvelopeError>;

/// A tagged, flattened domain value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(rename = "_type")]
    pub type_tag: String,

    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

/// Every domain value that may travel inside an envelope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Entity {
    RepoDescriptor(RepoDescriptor),
    AnalysisTarget(AnalysisTarget),
    AnalysisResult(AnalysisResult),
    LineStats(LineStats),
}

impl Entity {
    /// The envelope tag of the held variant.
    pub fn tag(&self) -> &'static str {
        match self {
            Self::RepoDescriptor(_) => RepoDescriptor::TAG,
            Self::AnalysisTarget(_) => AnalysisTarget::TAG,
            Self::AnalysisResult(_) => AnalysisResult::TAG,
            Self::LineStats(_) => LineStats::TAG,
        }
    }
}

/// A domain type with a fixed envelope tag.
pub trait Variant: Serialize + DeserializeOwned {
    const TAG: &'static str;

    fn into_entity(self) -> Entity;
}

macro_rules! variant {
    ($ty:ident) => {
        impl Variant for $ty {
            const TAG: &'static str = stringify!($ty);

            fn into_entity(self) -> Entity {
                Entity::$ty(self)
            }
        }
    };
}

variant!(RepoDescriptor);
variant!(AnalysisTarget);
variant!(AnalysisResult);
variant!(LineStats);

type Decoder = fn(Map<String, Value>) -> Result<Entity>;

/// Tag → constructor. Adding a variant means adding a row here.
static DECODERS: &[(&str, Decoder)] = &[
    (RepoDescriptor::TAG, decode_fields::<RepoDescriptor> as Decoder),
    (AnalysisTarget::TAG, decode_fields::<AnalysisTarget> as Decoder),
    (AnalysisResult::TAG, decode_fields::<AnalysisResult> as Decoder),
    (LineStats::TAG, decode_fields::<LineStats> as Decoder),
];

fn decode_fields<T: Variant>(fields: Map<String, Value>) -> Result<Entity> {
    Ok(serde_json::from_value::<T>(Value::Object(fields))?.into_entity())
}

fn decoder_for(tag: &str) -> Option<Decoder> {
    DECODERS
        .iter()
        .find(|(known, _)| *known == tag)
        .map(|(_, decoder)| *decoder)
}

/// Walks a value and fails on the first object carrying an unknown tag.
fn check_tags(value: &Value) -> Result<()> {
    match value {
        Value::Object(map) => {
            if let Some(tag) = map.get(TAG_KEY) {
                let tag = tag.as_str().unwrap_or_default();
                if decoder_for(tag).is_none() {
                    return Err(EnvelopeError::UnknownVariant(tag.to_string()));
                }
            }
            map.values().try_for_each(check_tags)
        }
        Value::Array(items) => items.iter().try_for_each(check_tags),
        _ => Ok(()),
    }
}

impl Envelope {
    /// Wraps a domain value, tagging it with its variant name.
    pub fn encode<T: Variant>(value: &T) -> Result<Self> {
        match serde_json::to_value(value)? {
            Value::Object(fields) => Ok(Self {
                type_tag: T::TAG.to_string(),
                fields,
            }),
            _ => Err(EnvelopeError::NotAnObject(T::TAG)),
        }
    }

    /// Reconstructs the concrete variant named by the tag.
    pub fn decode(self) -> Result<Entity> {
        let decoder = decoder_for(&self.type_tag)
            .ok_or_else(|| EnvelopeError::UnknownVariant(self.type_tag.clone()))?;
        self.fields.values().try_for_each(check_tags)?;
        decoder(self.fields)
    }

    /// Decodes, requiring a specific variant.
    pub fn decode_as<T: Variant>(self) -> Result<T> {
        if self.type_tag != T::TAG {
            if decoder_for(&self.type_tag).is_none() {
                return Err(EnvelopeError::UnknownVariant(self.type_tag));
            }
            return Err(EnvelopeError::UnexpectedVariant {
                expected: T::TAG,
                found: self.type_tag,
            });
        }
        self.fields.values().try_for_each(check_tags)?;
        Ok(serde_json::from_value(Value::Object(self.fields))?)
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

/// Serde adapter that writes a nested entity as its own envelope.
///
/// Use with `#[serde(with = "crate::envelope::nested")]`.
pub mod nested {
    use serde::de::Error as _;
    use serde::ser::Error as _;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    use super::{Envelope, Variant};

    pub fn serialize<T: Variant, S: Serializer>(
        value: &T,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        Envelope::encode(value)
            .map_err(S::Error::custom)?
            .serialize(serializer)
    }

    pub fn deserialize<'de, T: Variant, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<T, D::Error> {
        Envelope::deserialize(deserializer)?
            .decode_as::<T>()
            .map_err(D::Error::custom)
    }
}

/// Like [`nested`], for optional entities. `None` is written as `null`.
pub mod nested_opt {
    use serde::de::Error as _;
    use serde::ser::Error as _;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    use super::{Envelope, Variant};

    pub fn serialize<T: Variant, S: Serializer>(
        value: &Option<T>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match value {
            Some(v) => Envelope::encode(v)
                .map_err(S::Error::custom)?
                .serialize(serializer),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, T: Variant, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<T>, D::Error> {
        Option::<Envelope>::deserialize(deserializer)?
            .map(|e| e.decode_as::<T>().map_err(D::Error::custom))
            .transpose()
    }
}
