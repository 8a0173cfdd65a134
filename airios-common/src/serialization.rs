use serde::{Serialize, de::DeserializeOwned};

use crate::error::{Error, Result};

/// Wire encoding of published payloads.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Format {
    #[default]
    Json,
    Cbor,
}

impl Format {
    pub fn mime_type(&self) -> &'static str {
        match self {
            Format::Json => "application/json",
            Format::Cbor => "application/cbor",
        }
    }
}

pub fn encode<T: Serialize>(value: &T, format: Format) -> Result<Vec<u8>> {
    match format {
        Format::Json => Ok(serde_json::to_vec(value)?),
        Format::Cbor => {
            let mut buf = Vec::new();
            ciborium::into_writer(value, &mut buf)?;
            Ok(buf)
        }
    }
}

pub fn decode<T: DeserializeOwned>(data: &[u8], format: Format) -> Result<T> {
    match format {
        Format::Json => Ok(serde_json::from_slice(data)?),
        Format::Cbor => ciborium::from_reader(data).map_err(|e| Error::Cbor(e.to_string())),
    }
}

/// JSON payloads start with an object, array or string; anything else is CBOR.
pub fn detect_format(data: &[u8]) -> Format {
    match data.first() {
        Some(b'{') | Some(b'[') | Some(b'"') => Format::Json,
        _ => Format::Cbor,
    }
}

pub fn decode_auto<T: DeserializeOwned>(data: &[u8]) -> Result<T> {
    decode(data, detect_format(data))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::{EntityState, Platform, StateValue};

    fn sample() -> EntityState {
        EntityState::new(
            "0x01A2B3",
            Platform::Sensor,
            "indoor_air_temperature",
            StateValue::Float(21.5),
        )
    }

    #[test]
    fn test_cbor_decodes_to_same_state() {
        let state = sample();
        let bytes = encode(&state, Format::Cbor).unwrap();
        let back: EntityState = decode(&bytes, Format::Cbor).unwrap();
        assert_eq!(back, state);
    }

    #[test]
    fn test_auto_detect() {
        let state = sample();
        let json = encode(&state, Format::Json).unwrap();
        assert_eq!(detect_format(&json), Format::Json);
        let cbor = encode(&state, Format::Cbor).unwrap();
        assert_eq!(detect_format(&cbor), Format::Cbor);

        let back: EntityState = decode_auto(&cbor).unwrap();
        assert_eq!(back.key, "indoor_air_temperature");
    }

    #[test]
    fn test_quoted_string_is_json() {
        let option: String = decode_auto(br#""open""#).unwrap();
        assert_eq!(option, "open");
    }
}
