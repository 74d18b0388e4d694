//! Provider-issued checkpoints
//!
//! A checkpoint is a challenge the provider raises while authenticating an
//! account: a one-time code, a two-factor prompt, an approval on the
//! member's own device, a captcha or a phone registration. Until it is
//! resolved the account cannot be used.

use std::fmt;

use serde::{Deserialize, Serialize};

/// The closed set of challenges the provider can raise
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CheckpointType {
    /// SMS or authenticator-app two-factor code
    #[serde(rename = "2FA")]
    TwoFactor,
    /// One-time code sent by the provider
    #[serde(rename = "OTP")]
    Otp,
    /// Approval from the provider's own app, resolved out of band
    #[serde(rename = "IN_APP_VALIDATION")]
    InAppValidation,
    #[serde(rename = "CAPTCHA")]
    Captcha,
    /// Provider requires a phone number before continuing
    #[serde(rename = "PHONE_REGISTER")]
    PhoneRegister,
}

impl CheckpointType {
    pub const ALL: [CheckpointType; 5] = [
        CheckpointType::TwoFactor,
        CheckpointType::Otp,
        CheckpointType::InAppValidation,
        CheckpointType::Captcha,
        CheckpointType::PhoneRegister,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            CheckpointType::TwoFactor => "2FA",
            CheckpointType::Otp => "OTP",
            CheckpointType::InAppValidation => "IN_APP_VALIDATION",
            CheckpointType::Captcha => "CAPTCHA",
            CheckpointType::PhoneRegister => "PHONE_REGISTER",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "2FA" => Some(CheckpointType::TwoFactor),
            "OTP" => Some(CheckpointType::Otp),
            "IN_APP_VALIDATION" => Some(CheckpointType::InAppValidation),
            "CAPTCHA" => Some(CheckpointType::Captcha),
            "PHONE_REGISTER" => Some(CheckpointType::PhoneRegister),
            _ => None,
        }
    }

    /// Whether the challenge is resolved on the member's side rather than by
    /// submitting a code, so the only way forward is to wait for the provider.
    pub fn resolves_out_of_band(&self) -> bool {
        matches!(self, CheckpointType::InAppValidation)
    }
}

impl fmt::Display for CheckpointType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A checkpoint descriptor as returned by the provider
///
/// Only `type` is interpreted. Everything else the provider sends is kept in
/// `extra` so the payload can be stored verbatim.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    #[serde(rename = "type")]
    pub checkpoint_type: CheckpointType,

    /// Where the challenge is delivered, e.g. `APP`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,

    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl Checkpoint {
    pub fn new(checkpoint_type: CheckpointType) -> Self {
        Self {
            checkpoint_type,
            source: None,
            extra: serde_json::Map::new(),
        }
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }
}
