//! Session Bootstrap
//!
//! Turns the raw JSON body handed to a session into a typed [`CallConfig`].
//! Normalization never fails: absent, misspelled or mistyped fields collapse
//! to `None` or an empty list.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Dial-in identifiers needed to answer the inbound SIP leg.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DialinSettings {
    pub call_id: Option<String>,
    pub call_domain: Option<String>,
}

/// Where a dial-out goes. Exactly one address form per target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DialoutAddress {
    #[serde(rename_all = "camelCase")]
    Phone {
        phone_number: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        caller_id: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    Sip { sip_uri: String },
}

/// One outbound destination from `dialout_settings`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DialoutTarget {
    #[serde(flatten)]
    pub address: DialoutAddress,
}

impl DialoutTarget {
    pub fn phone(number: impl Into<String>, caller_id: Option<String>) -> Self {
        Self {
            address: DialoutAddress::Phone {
                phone_number: number.into(),
                caller_id,
            },
        }
    }

    pub fn sip(uri: impl Into<String>) -> Self {
        Self {
            address: DialoutAddress::Sip { sip_uri: uri.into() },
        }
    }

    /// Human-readable destination for logs.
    pub fn destination(&self) -> &str {
        match &self.address {
            DialoutAddress::Phone { phone_number, .. } => phone_number,
            DialoutAddress::Sip { sip_uri } => sip_uri,
        }
    }

    /// Parse one entry of `dialout_settings`.
    ///
    /// `phoneNumber` wins over `sipUri` when both are present. Entries with
    /// neither are not dialable and yield `None`.
    fn from_value(raw: &Value) -> Option<Self> {
        if let Some(number) = string_field(raw, &["phoneNumber", "phone_number"]) {
            let caller_id = string_field(raw, &["callerId", "caller_id"]);
            return Some(Self::phone(number, caller_id));
        }
        string_field(raw, &["sipUri", "sip_uri"]).map(Self::sip)
    }
}

/// Immutable per-session call configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallConfig {
    pub dialed_number: Option<String>,
    pub caller_number: Option<String>,
    pub dialin_settings: Option<DialinSettings>,
    pub dialout_targets: Vec<DialoutTarget>,
    pub voicemail_detection_enabled: bool,
}

impl CallConfig {
    pub fn is_dialin(&self) -> bool {
        self.dialin_settings.is_some()
    }

    pub fn has_dialout(&self) -> bool {
        !self.dialout_targets.is_empty()
    }
}

/// Normalize a raw session body into a [`CallConfig`].
pub fn normalize(body: &Value) -> CallConfig {
    let mut config = CallConfig::default();

    if let Some(raw) = body.get("dialin_settings").filter(|v| is_truthy(v)) {
        // Phone numbers may arrive capitalized; ids as snake or camel case.
        config.dialed_number = string_field(raw, &["To", "to"]);
        config.caller_number = string_field(raw, &["From", "from"]);
        config.dialin_settings = Some(DialinSettings {
            call_id: string_field(raw, &["callId", "call_id"]),
            call_domain: string_field(raw, &["callDomain", "call_domain"]),
        });
    }

    config.dialout_targets = body
        .get("dialout_settings")
        .and_then(Value::as_array)
        .map(|entries| entries.iter().filter_map(DialoutTarget::from_value).collect())
        .unwrap_or_default();

    let voicemail_requested = body.get("voicemail_detection").is_some_and(is_truthy);
    config.voicemail_detection_enabled = voicemail_requested && config.has_dialout();

    tracing::debug!(
        dialed = ?config.dialed_number,
        caller = ?config.caller_number,
        dialin = ?config.dialin_settings,
        dialout_targets = config.dialout_targets.len(),
        voicemail = config.voicemail_detection_enabled,
        "normalized session body"
    );

    config
}

/// First non-empty value among `keys`, rendered as a string.
fn string_field(raw: &Value, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|key| match raw.get(*key)? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    })
}

/// Loose truthiness for request flags (`true`, `1`, non-empty strings/collections).
fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}
