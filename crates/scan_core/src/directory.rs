//! Typed client for the remote participant directory.
//!
//! The directory answers two questions: may this payload be processed in
//! the given mode (`validate`), and record that it was (`register`). Calls
//! are never retried here; a failed `register` may still have committed on
//! the server side.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::{de::DeserializeOwned, Serialize};
use shared::{
    domain::Mode,
    error::ApiError,
    protocol::{
        Envelope, ParticipantPayload, RegisterRequest, RegisterResponse, ValidateRequest,
        ValidateResponse,
    },
};
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatusFlags {
    pub entrada: bool,
    pub delivered: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Participant {
    pub name: String,
    pub email: String,
    pub status: StatusFlags,
}

impl From<&ParticipantPayload> for Participant {
    fn from(value: &ParticipantPayload) -> Self {
        Self {
            name: value.name.clone(),
            email: value.email.clone(),
            status: StatusFlags {
                entrada: value.status.entrada,
                delivered: value.status.entrega,
            },
        }
    }
}

/// Answer of the `validate` call.
///
/// `reason` carries the service's human-readable message: the rejection
/// reason when `eligible` is false, the participant status note otherwise.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Validation {
    pub eligible: bool,
    pub participant: Option<Participant>,
    pub reason: Option<String>,
}

impl Validation {
    pub fn eligible(participant: Participant, message: Option<String>) -> Self {
        Self {
            eligible: true,
            participant: Some(participant),
            reason: message,
        }
    }

    pub fn rejected(participant: Option<Participant>, reason: Option<String>) -> Self {
        Self {
            eligible: false,
            participant,
            reason,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Registration {
    pub name: String,
    pub server_timestamp: DateTime<Utc>,
    pub message: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DirectoryError {
    #[error("directory service unreachable: {0}")]
    Transport(String),
    #[error("directory service rejected the request{}", describe_reason(.reason))]
    Rejected {
        status: Option<u16>,
        reason: Option<String>,
    },
    #[error("directory service returned HTTP {status}")]
    Status { status: u16 },
    #[error("malformed directory response: {0}")]
    Malformed(String),
}

fn describe_reason(reason: &Option<String>) -> String {
    reason
        .as_deref()
        .map(|reason| format!(": {reason}"))
        .unwrap_or_default()
}

fn classify_request_error(err: reqwest::Error) -> DirectoryError {
    if err.is_decode() {
        DirectoryError::Malformed(err.to_string())
    } else {
        DirectoryError::Transport(err.to_string())
    }
}

fn non_empty(message: &str) -> Option<String> {
    let trimmed = message.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

fn error_reason(error: Option<ApiError>) -> Option<String> {
    error.and_then(|error| non_empty(&error.message))
}

#[async_trait]
pub trait DirectoryClient: Send + Sync {
    async fn validate(&self, payload: &str, mode: Mode) -> Result<Validation, DirectoryError>;
    async fn register(&self, payload: &str, mode: Mode) -> Result<Registration, DirectoryError>;
}

#[derive(Debug, Clone)]
pub struct HttpDirectoryClient {
    http: Client,
    base_url: String,
}

impl HttpDirectoryClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_client(Client::new(), base_url)
    }

    /// Builds a client that bounds connection establishment only; an
    /// issued request is never aborted.
    pub fn with_connect_timeout(
        base_url: impl Into<String>,
        connect_timeout: Duration,
    ) -> Result<Self, DirectoryError> {
        let http = Client::builder()
            .connect_timeout(connect_timeout)
            .build()
            .map_err(|e| DirectoryError::Transport(format!("failed to build http client: {e}")))?;
        Ok(Self::with_client(http, base_url))
    }

    pub fn with_client(http: Client, base_url: impl Into<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self { http, base_url }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn post_envelope<B, T>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<(Option<u16>, Envelope<T>), DirectoryError>
    where
        B: Serialize + Sync,
        T: DeserializeOwned,
    {
        let url = format!("{}/{path}", self.base_url);
        debug!(%url, "posting directory request");

        let response = self
            .http
            .post(&url)
            .json(body)
            .send()
            .await
            .map_err(classify_request_error)?;
        let status = response.status();
        let bytes = response.bytes().await.map_err(classify_request_error)?;

        match serde_json::from_slice::<Envelope<T>>(&bytes) {
            Ok(envelope) if !status.is_success() && envelope.success => {
                Err(DirectoryError::Status {
                    status: status.as_u16(),
                })
            }
            Ok(envelope) => {
                let error_status = (!status.is_success()).then(|| status.as_u16());
                Ok((error_status, envelope))
            }
            Err(err) if status.is_success() => Err(DirectoryError::Malformed(err.to_string())),
            Err(_) => Err(DirectoryError::Status {
                status: status.as_u16(),
            }),
        }
    }
}

fn validation_from_envelope(envelope: ValidateResponse) -> Result<Validation, DirectoryError> {
    if !envelope.success {
        return Ok(Validation::rejected(None, error_reason(envelope.error)));
    }

    let data = envelope.data.ok_or_else(|| {
        DirectoryError::Malformed("successful validation without participant data".to_string())
    })?;
    let participant = Participant::from(&data);
    let message = non_empty(&data.message);

    if data.can_scan {
        Ok(Validation::eligible(participant, message))
    } else {
        Ok(Validation::rejected(Some(participant), message))
    }
}

fn registration_from_envelope(
    envelope: RegisterResponse,
    status: Option<u16>,
) -> Result<Registration, DirectoryError> {
    if !envelope.success {
        return Err(DirectoryError::Rejected {
            status,
            reason: error_reason(envelope.error),
        });
    }

    let data = envelope.data.ok_or_else(|| {
        DirectoryError::Malformed("successful registration without confirmation data".to_string())
    })?;
    Ok(Registration {
        name: data.name,
        server_timestamp: data.timestamp,
        message: data.message.as_deref().and_then(non_empty),
    })
}

#[async_trait]
impl DirectoryClient for HttpDirectoryClient {
    async fn validate(&self, payload: &str, mode: Mode) -> Result<Validation, DirectoryError> {
        let request = ValidateRequest {
            qr_code: payload.to_string(),
            mode,
        };
        let (_, envelope): (_, ValidateResponse) =
            self.post_envelope("validate", &request).await?;
        validation_from_envelope(envelope)
    }

    async fn register(&self, payload: &str, mode: Mode) -> Result<Registration, DirectoryError> {
        let request = RegisterRequest {
            qr_code: payload.to_string(),
        };
        let (status, envelope): (_, RegisterResponse) =
            self.post_envelope(mode.as_str(), &request).await?;
        registration_from_envelope(envelope, status)
    }
}

#[cfg(test)]
#[path = "tests/directory_tests.rs"]
mod tests;
