//! Session capabilities
//!
//! Accepts the JSON wire `desiredCapabilities` document as well as the W3C
//! `capabilities` object, where `alwaysMatch` is merged with the first
//! `firstMatch` entry.

use serde::Serialize;
use serde_json::{Map, Value};

use crate::device::DeviceCriteria;
use crate::error::{Error, Result};

/// App under test
pub const CAP_AUT: &str = "aut";
/// Activity to launch; makes the app identifier pass through unresolved
pub const CAP_LAUNCH_ACTIVITY: &str = "launchActivity";
pub const CAP_EMULATOR: &str = "emulator";
pub const CAP_SCREEN_SIZE: &str = "screenSize";
pub const CAP_PLATFORM_VERSION: &str = "platformVersion";
pub const CAP_LOCALE: &str = "locale";
pub const CAP_SERIAL: &str = "serial";

/// Requested capabilities of a session
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct Capabilities(Map<String, Value>);

impl Capabilities {
    pub fn new(map: Map<String, Value>) -> Self {
        Self(map)
    }

    /// Extract capabilities from a new-session request body
    pub fn from_request_body(body: &Value) -> Result<Self> {
        let Some(body) = body.as_object() else {
            return Err(Error::InvalidCapabilities(
                "request body must be a JSON object".to_string(),
            ));
        };

        if let Some(desired) = body.get("desiredCapabilities") {
            return match desired {
                Value::Object(map) => Ok(Self(map.clone())),
                _ => Err(Error::InvalidCapabilities(
                    "desiredCapabilities must be an object".to_string(),
                )),
            };
        }

        if let Some(capabilities) = body.get("capabilities") {
            return Self::from_w3c(capabilities);
        }

        Err(Error::InvalidCapabilities(
            "missing desiredCapabilities or capabilities".to_string(),
        ))
    }

    fn from_w3c(capabilities: &Value) -> Result<Self> {
        let mut merged = match capabilities.get("alwaysMatch") {
            Some(Value::Object(map)) => map.clone(),
            Some(_) => {
                return Err(Error::InvalidCapabilities(
                    "alwaysMatch must be an object".to_string(),
                ))
            }
            None => Map::new(),
        };

        if let Some(first) = capabilities
            .get("firstMatch")
            .and_then(Value::as_array)
            .and_then(|entries| entries.first())
        {
            let Value::Object(first) = first else {
                return Err(Error::InvalidCapabilities(
                    "firstMatch entries must be objects".to_string(),
                ));
            };
            for (key, value) in first {
                merged.entry(key.clone()).or_insert_with(|| value.clone());
            }
        }

        Ok(Self(merged))
    }

    /// Raw value, also matching vendor-prefixed keys like `selendroid:aut`
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key).or_else(|| {
            self.0
                .iter()
                .find(|(k, _)| k.rsplit_once(':').map(|(_, name)| name) == Some(key))
                .map(|(_, v)| v)
        })
    }

    /// String value; numbers and booleans are rendered as text
    pub fn get_str(&self, key: &str) -> Option<String> {
        match self.get(key)? {
            Value::String(s) if s.is_empty() => None,
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            Value::Bool(b) => Some(b.to_string()),
            _ => None,
        }
    }

    /// Requested app identifier
    pub fn app(&self) -> Result<String> {
        self.get_str(CAP_AUT)
            .ok_or_else(|| Error::InvalidCapabilities(format!("'{CAP_AUT}' capability is required")))
    }

    pub fn launch_activity(&self) -> Option<String> {
        self.get_str(CAP_LAUNCH_ACTIVITY)
    }

    /// Device requirements
    pub fn criteria(&self) -> Result<DeviceCriteria> {
        let emulator = match self.get(CAP_EMULATOR) {
            None | Some(Value::Null) => None,
            Some(Value::Bool(b)) => Some(*b),
            Some(Value::String(s)) => match s.to_ascii_lowercase().as_str() {
                "true" => Some(true),
                "false" => Some(false),
                "" => None,
                other => {
                    return Err(Error::InvalidCapabilities(format!(
                        "'{CAP_EMULATOR}' must be a boolean, got '{other}'"
                    )))
                }
            },
            Some(other) => {
                return Err(Error::InvalidCapabilities(format!(
                    "'{CAP_EMULATOR}' must be a boolean, got {other}"
                )))
            }
        };

        let mut criteria = DeviceCriteria {
            emulator,
            platform_version: self.get_str(CAP_PLATFORM_VERSION),
            locale: self.get_str(CAP_LOCALE),
            serial: self.get_str(CAP_SERIAL),
            ..Default::default()
        };
        if let Some(size) = self.get_str(CAP_SCREEN_SIZE) {
            criteria = criteria.with_screen_size(size);
        }
        Ok(criteria)
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    pub fn to_value(&self) -> Value {
        Value::Object(self.0.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_json_wire_body() {
        let body = json!({
            "desiredCapabilities": {
                "aut": "io.selendroid.testapp:0.17.0",
                "emulator": true,
                "screenSize": "320x480",
                "platformVersion": 19
            }
        });

        let caps = Capabilities::from_request_body(&body).unwrap();
        assert_eq!(caps.app().unwrap(), "io.selendroid.testapp:0.17.0");

        let criteria = caps.criteria().unwrap();
        assert_eq!(criteria.emulator, Some(true));
        assert_eq!(criteria.screen_size.as_deref(), Some("320x480"));
        assert_eq!(criteria.platform_version.as_deref(), Some("19"));
        assert_eq!(criteria.locale, None);
    }

    #[test]
    fn test_w3c_body_merges_first_match() {
        let body = json!({
            "capabilities": {
                "alwaysMatch": { "selendroid:aut": "io.example", "locale": "en_US" },
                "firstMatch": [
                    { "emulator": "false", "locale": "de_DE" },
                    { "emulator": true }
                ]
            }
        });

        let caps = Capabilities::from_request_body(&body).unwrap();
        assert_eq!(caps.app().unwrap(), "io.example");

        let criteria = caps.criteria().unwrap();
        assert_eq!(criteria.emulator, Some(false));
        assert_eq!(criteria.locale.as_deref(), Some("en_US"));
    }

    #[test]
    fn test_missing_app_is_invalid() {
        let caps = Capabilities::from_request_body(&json!({"desiredCapabilities": {}})).unwrap();
        assert!(matches!(caps.app(), Err(Error::InvalidCapabilities(_))));
    }

    #[test]
    fn test_rejects_malformed_bodies() {
        assert!(Capabilities::from_request_body(&json!([])).is_err());
        assert!(Capabilities::from_request_body(&json!({"foo": 1})).is_err());
        assert!(Capabilities::from_request_body(&json!({"desiredCapabilities": "x"})).is_err());

        let caps = Capabilities::from_request_body(&json!({
            "desiredCapabilities": {"aut": "a", "emulator": "maybe"}
        }))
        .unwrap();
        assert!(matches!(caps.criteria(), Err(Error::InvalidCapabilities(_))));
    }
}
