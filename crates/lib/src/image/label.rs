//! Typed access to JSON-encoded image labels.
//!
//! Malformed label content is always an error, never an empty value.

use serde::Serialize;
use serde::de::DeserializeOwned;
use thiserror::Error;

use super::Image;

#[derive(Debug, Error)]
pub enum LabelError {
  #[error("failed to decode label '{key}' on image '{image}': {source}")]
  Decode {
    key: String,
    image: String,
    #[source]
    source: serde_json::Error,
  },

  #[error("failed to encode label '{key}': {source}")]
  Encode {
    key: String,
    #[source]
    source: serde_json::Error,
  },
}

/// Decode a label, `Ok(None)` when it is absent.
pub fn decode_label<T: DeserializeOwned>(image: &dyn Image, key: &str) -> Result<Option<T>, LabelError> {
  let Some(raw) = image.label(key) else {
    return Ok(None);
  };
  serde_json::from_str(raw).map(Some).map_err(|source| LabelError::Decode {
    key: key.to_string(),
    image: image.name().to_string(),
    source,
  })
}

pub fn encode_label<T: Serialize>(image: &mut dyn Image, key: &str, value: &T) -> Result<(), LabelError> {
  let raw = serde_json::to_string(value).map_err(|source| LabelError::Encode {
    key: key.to_string(),
    source,
  })?;
  image.set_label(key, &raw);
  Ok(())
}

/// Decode the stack mixins label. A missing or blank label is an empty set.
pub fn decode_mixins(image: &dyn Image, key: &str) -> Result<Vec<String>, LabelError> {
  match image.label(key) {
    Some(raw) if !raw.trim().is_empty() => decode_label(image, key).map(Option::unwrap_or_default),
    _ => Ok(Vec::new()),
  }
}
