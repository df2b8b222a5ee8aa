//! Operator-facing text for confirmation prompts and terminal alerts.

use chrono::Local;
use serde::Serialize;

use crate::controller::{Confirmation, RemoteStage, ScanFailure, Terminal};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NoticeKind {
    Success,
    Error,
    Info,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notice {
    pub kind: NoticeKind,
    pub title: String,
    pub message: String,
}

impl Notice {
    fn new(kind: NoticeKind, title: &str, message: impl Into<String>) -> Self {
        Self {
            kind,
            title: title.to_string(),
            message: message.into(),
        }
    }

    pub fn for_terminal(terminal: &Terminal) -> Self {
        match terminal {
            Terminal::Registered { registration, .. } => {
                let when = registration
                    .server_timestamp
                    .with_timezone(&Local)
                    .format("%d/%m/%Y %H:%M");
                let headline = registration
                    .message
                    .as_deref()
                    .unwrap_or("Registro completado");
                Self::new(
                    NoticeKind::Success,
                    "Registro Exitoso",
                    format!(
                        "{headline}\n\nParticipante: {}\nHora: {when}",
                        registration.name
                    ),
                )
            }
            Terminal::Failed { failure, .. } => Self::for_failure(failure),
            Terminal::Cancelled { .. } => Self::new(
                NoticeKind::Info,
                "Registro Cancelado",
                "No se registró ningún cambio para este código",
            ),
        }
    }

    pub fn for_failure(failure: &ScanFailure) -> Self {
        match failure {
            ScanFailure::ValidationRejected { reason } => Self::new(
                NoticeKind::Error,
                "Error de Validación",
                reason.as_deref().unwrap_or("QR no válido"),
            ),
            ScanFailure::RegistrationFailed { reason } => Self::new(
                NoticeKind::Error,
                "Error al Registrar",
                reason
                    .as_deref()
                    .unwrap_or("No se pudo registrar el escaneo"),
            ),
            ScanFailure::TransportError {
                stage: RemoteStage::Validation,
                detail,
            } => Self::new(
                NoticeKind::Error,
                "Sin Conexión",
                format!("No se pudo contactar el servicio de validación ({detail})"),
            ),
            // The write may have landed before the connection dropped.
            ScanFailure::TransportError {
                stage: RemoteStage::Registration,
                detail,
            } => Self::new(
                NoticeKind::Error,
                "Sin Conexión",
                format!(
                    "No se pudo confirmar el registro ({detail}). \
                     Verifique el estado del participante antes de volver a escanear"
                ),
            ),
            ScanFailure::UnexpectedFailure {
                stage: RemoteStage::Validation,
                ..
            } => Self::new(
                NoticeKind::Error,
                "Error",
                "Ocurrió un error al procesar el QR",
            ),
            ScanFailure::UnexpectedFailure {
                stage: RemoteStage::Registration,
                ..
            } => Self::new(
                NoticeKind::Error,
                "Error",
                "Ocurrió un error al registrar el escaneo",
            ),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConfirmationPrompt {
    pub title: String,
    pub message: String,
    pub confirm_label: String,
}

impl ConfirmationPrompt {
    pub fn for_confirmation(confirmation: &Confirmation) -> Self {
        let participant = &confirmation.participant;
        let mut message = format!(
            "{}\n{}\n\nEstado Entrada: {}\nEstado Entrega: {}",
            participant.name,
            participant.email,
            flag(participant.status.entrada),
            flag(participant.status.delivered),
        );
        if let Some(note) = &confirmation.message {
            message.push_str("\n\n");
            message.push_str(note);
        }

        Self {
            title: "Participante Encontrado".to_string(),
            message,
            confirm_label: "Registrar".to_string(),
        }
    }
}

fn flag(done: bool) -> &'static str {
    if done {
        "✅"
    } else {
        "❌"
    }
}

#[cfg(test)]
mod tests {
    use shared::domain::Mode;

    use super::*;
    use crate::{
        controller::SessionId,
        directory::{Participant, StatusFlags},
    };

    #[test]
    fn rejection_without_reason_falls_back_to_generic_text() {
        let notice = Notice::for_failure(&ScanFailure::ValidationRejected { reason: None });
        assert_eq!(notice.kind, NoticeKind::Error);
        assert_eq!(notice.title, "Error de Validación");
        assert_eq!(notice.message, "QR no válido");
    }

    #[test]
    fn registration_transport_failure_warns_about_possible_commit() {
        let notice = Notice::for_failure(&ScanFailure::TransportError {
            stage: RemoteStage::Registration,
            detail: "connection reset".to_string(),
        });
        assert_eq!(notice.title, "Sin Conexión");
        assert!(notice.message.contains("connection reset"));
        assert!(notice.message.contains("antes de volver a escanear"));
    }

    #[test]
    fn prompt_lists_identity_flags_and_service_note() {
        let prompt = ConfirmationPrompt::for_confirmation(&Confirmation {
            session: SessionId(4),
            payload: "ABC123".to_string(),
            mode: Mode::Entrega,
            participant: Participant {
                name: "Ana".to_string(),
                email: "ana@example.org".to_string(),
                status: StatusFlags {
                    entrada: true,
                    delivered: false,
                },
            },
            message: Some("Puede recibir su pasaporte".to_string()),
        });

        assert_eq!(prompt.confirm_label, "Registrar");
        assert_eq!(
            prompt.message,
            "Ana\nana@example.org\n\nEstado Entrada: ✅\nEstado Entrega: ❌\n\nPuede recibir su pasaporte"
        );
    }
}
