//! Serialization formats
//!
//! Template data files and structured dumps share one set of formats:
//! JSON (2-space indent), TOML, and YAML. Every format decodes into any
//! deserializable value and marshals any serializable one.

use crate::error::{Error, Result};
use serde::Serialize;
use serde::de::DeserializeOwned;

/// A serialization format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Format {
    /// JSON with 2-space indentation
    Json,
    /// TOML
    Toml,
    /// YAML
    Yaml,
}

impl Format {
    /// Resolve a format from a file extension
    #[must_use]
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_ascii_lowercase().as_str() {
            "json" => Some(Format::Json),
            "toml" => Some(Format::Toml),
            "yaml" | "yml" => Some(Format::Yaml),
            _ => None,
        }
    }

    /// The format's name
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Format::Json => "json",
            Format::Toml => "toml",
            Format::Yaml => "yaml",
        }
    }

    /// Decode `data` into a typed value
    pub fn decode<T: DeserializeOwned>(self, data: &[u8]) -> Result<T> {
        match self {
            Format::Json => serde_json::from_slice(data).map_err(|e| self.parse_error(&e)),
            Format::Toml => {
                let text = std::str::from_utf8(data).map_err(|e| self.parse_error(&e))?;
                toml::from_str(text).map_err(|e| self.parse_error(&e))
            }
            Format::Yaml => serde_yaml::from_slice(data).map_err(|e| self.parse_error(&e)),
        }
    }

    /// Encode a value into bytes
    pub fn marshal<T: Serialize>(self, value: &T) -> Result<Vec<u8>> {
        match self {
            Format::Json => {
                let mut data = serde_json::to_vec_pretty(value)?;
                data.push(b'\n');
                Ok(data)
            }
            Format::Toml => toml::to_string(value)
                .map(String::into_bytes)
                .map_err(|e| self.parse_error(&e)),
            Format::Yaml => serde_yaml::to_string(value)
                .map(String::into_bytes)
                .map_err(|e| self.parse_error(&e)),
        }
    }

    /// Decode `data` into an untyped value
    pub fn unmarshal(self, data: &[u8]) -> Result<serde_json::Value> {
        self.decode(data)
    }

    fn parse_error(self, err: &dyn std::fmt::Display) -> Error {
        Error::Parse {
            context: self.name().to_string(),
            message: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::panic)]
    use super::*;
    use serde_json::json;

    #[test]
    fn test_from_extension() {
        assert_eq!(Format::from_extension("json"), Some(Format::Json));
        assert_eq!(Format::from_extension("TOML"), Some(Format::Toml));
        assert_eq!(Format::from_extension("yml"), Some(Format::Yaml));
        assert_eq!(Format::from_extension("ini"), None);
    }

    #[test]
    fn test_json_marshal_uses_two_space_indent() {
        let data = Format::Json.marshal(&json!({"a": 1})).unwrap();
        assert_eq!(String::from_utf8(data).unwrap(), "{\n  \"a\": 1\n}\n");
    }

    #[test]
    fn test_roundtrip_value_through_each_format() {
        let value = json!({"email": "you@example.com", "n": 3, "nested": {"ok": true}});
        for format in [Format::Json, Format::Toml, Format::Yaml] {
            let data = format.marshal(&value).unwrap();
            let back = format.unmarshal(&data).unwrap();
            assert_eq!(back, value, "{}", format.name());
        }
    }

    #[test]
    fn test_decode_error_names_format() {
        let err = Format::Toml.unmarshal(b"= broken").unwrap_err();
        assert!(err.to_string().contains("toml"));
    }
}
