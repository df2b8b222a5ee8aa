use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{domain::Mode, error::ApiError};

/// Envelope wrapping every directory service response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ApiError>,
}

impl<T> Envelope<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn failed(error: ApiError) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(error),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidateRequest {
    pub qr_code: String,
    pub mode: Mode,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterRequest {
    pub qr_code: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParticipantStatusPayload {
    #[serde(default)]
    pub entrada: bool,
    #[serde(default)]
    pub entrega: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParticipantPayload {
    pub name: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub status: ParticipantStatusPayload,
    #[serde(default)]
    pub message: String,
    pub can_scan: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistrationPayload {
    pub name: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

pub type ValidateResponse = Envelope<ParticipantPayload>;
pub type RegisterResponse = Envelope<RegistrationPayload>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failed_envelope_without_data_key_decodes() {
        let envelope: ValidateResponse =
            serde_json::from_str(r#"{"success":false,"error":{"message":"QR no registrado"}}"#)
                .expect("decode");
        assert!(!envelope.success);
        assert!(envelope.data.is_none());
        assert_eq!(
            envelope.error.map(|error| error.message),
            Some("QR no registrado".to_string())
        );
    }
}
