//! Provider config codec.
//!
//! Typed payloads are written as a JSON envelope carrying `apiVersion` and
//! `kind` next to the payload's own fields:
//!
//! ```text
//! {"apiVersion":"sshgrid.io/v1alpha1","kind":"MachineSpec","provisionedMachineName":"10.0.0.5","roles":["Node"]}
//! ```
//!
//! Decoding checks both header fields against the target type before
//! touching the body, so a `MachineStatus` payload can never be read back as
//! a `MachineSpec`.

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};

use crate::error::{CoreError, CoreResult};
use crate::types::ProviderConfig;

/// API version stamped on every payload this crate writes.
pub const API_VERSION: &str = "sshgrid.io/v1alpha1";

const API_VERSION_FIELD: &str = "apiVersion";
const KIND_FIELD: &str = "kind";

/// A typed payload that can travel inside a [`ProviderConfig`].
pub trait ProviderKind: Serialize + DeserializeOwned {
    const KIND: &'static str;
}

#[derive(Serialize)]
struct Envelope<'a, T> {
    #[serde(rename = "apiVersion")]
    api_version: &'a str,
    kind: &'a str,
    #[serde(flatten)]
    body: &'a T,
}

#[derive(Debug, Clone)]
pub struct ProviderConfigCodec {
    api_version: String,
}

impl Default for ProviderConfigCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl ProviderConfigCodec {
    pub fn new() -> Self {
        Self::with_api_version(API_VERSION)
    }

    pub fn with_api_version(api_version: &str) -> Self {
        Self {
            api_version: api_version.to_string(),
        }
    }

    pub fn encode<T: ProviderKind>(&self, value: &T) -> CoreResult<ProviderConfig> {
        let envelope = Envelope {
            api_version: &self.api_version,
            kind: T::KIND,
            body: value,
        };
        let bytes = serde_json::to_vec(&envelope)
            .map_err(|e| CoreError::Encoding(format!("{}: {e}", T::KIND)))?;
        Ok(ProviderConfig { value: bytes })
    }

    pub fn decode<T: ProviderKind>(&self, config: &ProviderConfig) -> CoreResult<T> {
        let mut fields: Map<String, Value> = serde_json::from_slice(&config.value)
            .map_err(|e| CoreError::Encoding(format!("{}: {e}", T::KIND)))?;

        let api_version = take_string(&mut fields, API_VERSION_FIELD);
        let kind = take_string(&mut fields, KIND_FIELD);
        let expected = format!("{}/{}", self.api_version, T::KIND);
        let found = format!(
            "{}/{}",
            api_version.as_deref().unwrap_or("<none>"),
            kind.as_deref().unwrap_or("<none>")
        );
        if expected != found {
            return Err(CoreError::SchemaMismatch { expected, found });
        }

        serde_json::from_value(Value::Object(fields))
            .map_err(|e| CoreError::Encoding(format!("{}: {e}", T::KIND)))
    }
}

fn take_string(fields: &mut Map<String, Value>, key: &str) -> Option<String> {
    match fields.remove(key) {
        Some(Value::String(s)) => Some(s),
        _ => None,
    }
}
