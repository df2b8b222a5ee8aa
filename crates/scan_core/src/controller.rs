//! Scan session state machine.
//!
//! One controller drives at most one session at a time:
//! `Idle -> Validating -> AwaitingConfirmation -> Registering -> Terminal -> Idle`,
//! with `Validating` and `AwaitingConfirmation` also able to jump straight to
//! `Terminal`. The internal lock is never held across a directory call; the
//! non-idle phase stored under it is what keeps a second payload out.

use std::{any::Any, future::Future, panic::AssertUnwindSafe, sync::Arc};

use futures::FutureExt;
use serde::Serialize;
use shared::domain::{Mode, ScanOutcome};
use thiserror::Error;
use tokio::{
    sync::{broadcast, Mutex, MutexGuard},
    task::JoinHandle,
};
use tracing::{debug, error, info, warn};

use crate::{
    directory::{DirectoryClient, DirectoryError, Participant, Registration},
    history::{ScanHistory, ScanRecord},
    notice::Notice,
};

const EVENT_CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct SessionId(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "phase", content = "outcome", rename_all = "snake_case")]
pub enum SessionPhase {
    Idle,
    Validating,
    AwaitingConfirmation,
    Registering,
    Terminal(ScanOutcome),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RemoteStage {
    Validation,
    Registration,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Error)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ScanFailure {
    #[error("validation rejected{}", describe(.reason))]
    ValidationRejected { reason: Option<String> },
    #[error("registration failed{}", describe(.reason))]
    RegistrationFailed { reason: Option<String> },
    #[error("directory unreachable during {stage:?}: {detail}")]
    TransportError { stage: RemoteStage, detail: String },
    #[error("unexpected failure during {stage:?}: {detail}")]
    UnexpectedFailure { stage: RemoteStage, detail: String },
}

fn describe(reason: &Option<String>) -> String {
    reason
        .as_deref()
        .map(|reason| format!(": {reason}"))
        .unwrap_or_default()
}

impl ScanFailure {
    fn from_directory_error(stage: RemoteStage, err: DirectoryError) -> Self {
        match err {
            DirectoryError::Transport(detail) => ScanFailure::TransportError { stage, detail },
            DirectoryError::Status { status } if matches!(status, 502..=504) => {
                ScanFailure::TransportError {
                    stage,
                    detail: format!("directory gateway answered HTTP {status}"),
                }
            }
            DirectoryError::Rejected { reason, .. } => match stage {
                RemoteStage::Validation => ScanFailure::ValidationRejected { reason },
                RemoteStage::Registration => ScanFailure::RegistrationFailed { reason },
            },
            other @ (DirectoryError::Status { .. } | DirectoryError::Malformed(_)) => {
                ScanFailure::UnexpectedFailure {
                    stage,
                    detail: other.to_string(),
                }
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Confirmation {
    pub session: SessionId,
    pub payload: String,
    pub mode: Mode,
    pub participant: Participant,
    pub message: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionChoice {
    Confirm,
    Cancel,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct OperatorDecision {
    pub session: SessionId,
    pub choice: DecisionChoice,
}

impl OperatorDecision {
    pub fn confirm(session: SessionId) -> Self {
        Self {
            session,
            choice: DecisionChoice::Confirm,
        }
    }

    pub fn cancel(session: SessionId) -> Self {
        Self {
            session,
            choice: DecisionChoice::Cancel,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Terminal {
    Registered {
        session: SessionId,
        record: ScanRecord,
        registration: Registration,
    },
    Failed {
        session: SessionId,
        record: ScanRecord,
        failure: ScanFailure,
    },
    /// Operator abandoned the scan at the confirmation step. Nothing is
    /// registered and no history record is written.
    Cancelled {
        session: SessionId,
        payload: String,
        mode: Mode,
    },
}

impl Terminal {
    pub fn session(&self) -> SessionId {
        match self {
            Terminal::Registered { session, .. }
            | Terminal::Failed { session, .. }
            | Terminal::Cancelled { session, .. } => *session,
        }
    }

    pub fn outcome(&self) -> ScanOutcome {
        match self {
            Terminal::Registered { .. } => ScanOutcome::Valid,
            Terminal::Failed { .. } | Terminal::Cancelled { .. } => ScanOutcome::Invalid,
        }
    }

    pub fn record(&self) -> Option<&ScanRecord> {
        match self {
            Terminal::Registered { record, .. } | Terminal::Failed { record, .. } => Some(record),
            Terminal::Cancelled { .. } => None,
        }
    }

    pub fn failure(&self) -> Option<&ScanFailure> {
        match self {
            Terminal::Failed { failure, .. } => Some(failure),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", content = "phase", rename_all = "snake_case")]
pub enum IgnoreReason {
    Busy(SessionPhase),
    NoModeSelected,
    NoPendingConfirmation,
    StaleDecision,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanStep {
    Ignored(IgnoreReason),
    AwaitingConfirmation(Confirmation),
    Finished(Terminal),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ModeSwitchError {
    #[error("cannot switch mode while a scan session is {0:?}")]
    SessionActive(SessionPhase),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionState {
    pub id: SessionId,
    pub phase: SessionPhase,
    pub mode: Mode,
    pub payload: String,
    pub participant: Option<Participant>,
    pub message: Option<String>,
}

impl SessionState {
    fn validating(id: SessionId, mode: Mode, payload: String) -> Self {
        Self {
            id,
            phase: SessionPhase::Validating,
            mode,
            payload,
            participant: None,
            message: None,
        }
    }

    fn pending_confirmation(&self) -> Option<Confirmation> {
        if self.phase != SessionPhase::AwaitingConfirmation {
            return None;
        }
        let participant = self.participant.clone()?;
        Some(Confirmation {
            session: self.id,
            payload: self.payload.clone(),
            mode: self.mode,
            participant,
            message: self.message.clone(),
        })
    }

    fn participant_name(&self) -> Option<String> {
        self.participant.as_ref().map(|p| p.name.clone())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ControllerSnapshot {
    pub mode: Option<Mode>,
    pub phase: SessionPhase,
    pub session: Option<SessionState>,
    pub pending: Option<Confirmation>,
    pub last_terminal: Option<Terminal>,
    pub last_notice: Option<Notice>,
}

#[derive(Debug, Clone)]
pub enum ControllerEvent {
    ModeChanged(Mode),
    PhaseChanged {
        session: SessionId,
        phase: SessionPhase,
    },
    ConfirmationRequested(Confirmation),
    RecordAppended(Arc<ScanRecord>),
    Notice(Notice),
}

#[derive(Debug, Default)]
struct ControllerState {
    mode: Option<Mode>,
    session: Option<SessionState>,
    last_session: u64,
    last_terminal: Option<Terminal>,
    last_notice: Option<Notice>,
}

pub struct ScanSessionController {
    core: Arc<ControllerCore>,
}

struct ControllerCore {
    directory: Arc<dyn DirectoryClient>,
    history: Arc<ScanHistory>,
    inner: Mutex<ControllerState>,
    events: broadcast::Sender<ControllerEvent>,
}

impl ScanSessionController {
    pub fn new(
        directory: Arc<dyn DirectoryClient>,
        history: Arc<ScanHistory>,
        initial_mode: Option<Mode>,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let core = ControllerCore {
            directory,
            history,
            inner: Mutex::new(ControllerState {
                mode: initial_mode,
                ..ControllerState::default()
            }),
            events,
        };
        Self {
            core: Arc::new(core),
        }
    }

    pub fn history(&self) -> &Arc<ScanHistory> {
        &self.core.history
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ControllerEvent> {
        self.core.events.subscribe()
    }

    pub async fn mode(&self) -> Option<Mode> {
        self.core.inner.lock().await.mode
    }

    pub async fn select_mode(&self, mode: Mode) -> Result<(), ModeSwitchError> {
        {
            let mut inner = self.core.inner.lock().await;
            if let Some(active) = &inner.session {
                warn!(
                    session = active.id.0,
                    phase = ?active.phase,
                    requested = %mode,
                    "refusing mode switch during active scan session"
                );
                return Err(ModeSwitchError::SessionActive(active.phase));
            }
            if inner.mode == Some(mode) {
                return Ok(());
            }
            inner.mode = Some(mode);
            inner.last_terminal = None;
            inner.last_notice = None;
        }

        info!(mode = %mode, "operation mode selected");
        self.core.emit(ControllerEvent::ModeChanged(mode));
        Ok(())
    }

    pub async fn snapshot(&self) -> ControllerSnapshot {
        let inner = self.core.inner.lock().await;
        let phase = inner
            .session
            .as_ref()
            .map_or(SessionPhase::Idle, |session| session.phase);
        ControllerSnapshot {
            mode: inner.mode,
            phase,
            session: inner.session.clone(),
            pending: inner
                .session
                .as_ref()
                .and_then(SessionState::pending_confirmation),
            last_terminal: inner.last_terminal.clone(),
            last_notice: inner.last_notice.clone(),
        }
    }

    /// The directory call runs on a task owned by the controller, so the
    /// session still settles if the returned future is dropped.
    pub async fn payload_decoded(&self, payload: impl Into<String>) -> ScanStep {
        let payload = payload.into();
        let (session, mode) = {
            let mut inner = self.core.inner.lock().await;
            if let Some(active) = &inner.session {
                debug!(
                    session = active.id.0,
                    phase = ?active.phase,
                    "ignoring decoded payload while a session is active"
                );
                return ScanStep::Ignored(IgnoreReason::Busy(active.phase));
            }
            let Some(mode) = inner.mode else {
                debug!("ignoring decoded payload before a mode is selected");
                return ScanStep::Ignored(IgnoreReason::NoModeSelected);
            };
            inner.last_session += 1;
            let session = SessionId(inner.last_session);
            inner.session = Some(SessionState::validating(session, mode, payload.clone()));
            (session, mode)
        };

        info!(session = session.0, mode = %mode, "validating scanned payload");
        self.core.emit(ControllerEvent::PhaseChanged {
            session,
            phase: SessionPhase::Validating,
        });

        let core = Arc::clone(&self.core);
        let worker =
            tokio::spawn(async move { core.complete_validation(session, payload, mode).await });
        self.core
            .settle(worker, session, RemoteStage::Validation)
            .await
    }

    pub async fn decide(&self, decision: OperatorDecision) -> ScanStep {
        let (payload, mode, participant_name) = {
            let mut inner = self.core.inner.lock().await;
            let Some(active) = inner.session.as_mut() else {
                debug!(session = decision.session.0, "no session awaiting a decision");
                return ScanStep::Ignored(IgnoreReason::NoPendingConfirmation);
            };
            if active.phase != SessionPhase::AwaitingConfirmation {
                debug!(
                    session = active.id.0,
                    phase = ?active.phase,
                    "decision arrived outside the confirmation step"
                );
                return ScanStep::Ignored(IgnoreReason::NoPendingConfirmation);
            }
            if active.id != decision.session {
                debug!(
                    pending = active.id.0,
                    decided = decision.session.0,
                    "ignoring decision for a stale session"
                );
                return ScanStep::Ignored(IgnoreReason::StaleDecision);
            }

            match decision.choice {
                DecisionChoice::Cancel => {
                    let terminal = Terminal::Cancelled {
                        session: active.id,
                        payload: active.payload.clone(),
                        mode: active.mode,
                    };
                    info!(session = active.id.0, "operator cancelled scan");
                    return self.core.finish(inner, terminal);
                }
                DecisionChoice::Confirm => {
                    active.phase = SessionPhase::Registering;
                    (
                        active.payload.clone(),
                        active.mode,
                        active.participant_name(),
                    )
                }
            }
        };

        let session = decision.session;
        info!(session = session.0, mode = %mode, "registering confirmed scan");
        self.core.emit(ControllerEvent::PhaseChanged {
            session,
            phase: SessionPhase::Registering,
        });

        let core = Arc::clone(&self.core);
        let worker = tokio::spawn(async move {
            core.complete_registration(session, payload, mode, participant_name)
                .await
        });
        self.core
            .settle(worker, session, RemoteStage::Registration)
            .await
    }
}

impl ControllerCore {
    async fn complete_validation(
        &self,
        session: SessionId,
        payload: String,
        mode: Mode,
    ) -> ScanStep {
        let validation = guarded(
            RemoteStage::Validation,
            self.directory.validate(&payload, mode),
        )
        .await;

        let mut inner = self.inner.lock().await;
        let validation = match validation {
            Ok(validation) => validation,
            Err(failure) => {
                let terminal = failed(session, payload, mode, failure, None);
                return self.finish(inner, terminal);
            }
        };

        let participant_name = validation.participant.as_ref().map(|p| p.name.clone());
        match (validation.eligible, validation.participant) {
            (true, Some(participant)) => {
                let confirmation = Confirmation {
                    session,
                    payload: payload.clone(),
                    mode,
                    participant: participant.clone(),
                    message: validation.reason.clone(),
                };
                inner.session = Some(SessionState {
                    id: session,
                    phase: SessionPhase::AwaitingConfirmation,
                    mode,
                    payload,
                    participant: Some(participant),
                    message: validation.reason,
                });
                drop(inner);

                info!(
                    session = session.0,
                    participant = %confirmation.participant.name,
                    "awaiting operator confirmation"
                );
                self.emit(ControllerEvent::PhaseChanged {
                    session,
                    phase: SessionPhase::AwaitingConfirmation,
                });
                self.emit(ControllerEvent::ConfirmationRequested(confirmation.clone()));
                ScanStep::AwaitingConfirmation(confirmation)
            }
            (true, None) => {
                let failure = ScanFailure::UnexpectedFailure {
                    stage: RemoteStage::Validation,
                    detail: "eligible validation without participant identity".to_string(),
                };
                let terminal = failed(session, payload, mode, failure, None);
                self.finish(inner, terminal)
            }
            (false, _) => {
                let failure = ScanFailure::ValidationRejected {
                    reason: validation.reason,
                };
                let terminal = failed(session, payload, mode, failure, participant_name);
                self.finish(inner, terminal)
            }
        }
    }

    async fn complete_registration(
        &self,
        session: SessionId,
        payload: String,
        mode: Mode,
        participant_name: Option<String>,
    ) -> ScanStep {
        let registration = guarded(
            RemoteStage::Registration,
            self.directory.register(&payload, mode),
        )
        .await;

        let inner = self.inner.lock().await;
        let terminal = match registration {
            Ok(registration) => {
                let record = ScanRecord::new(
                    payload,
                    ScanOutcome::Valid,
                    mode,
                    Some(registration.name.clone()),
                );
                info!(
                    session = session.0,
                    participant = %registration.name,
                    "scan registered"
                );
                Terminal::Registered {
                    session,
                    record,
                    registration,
                }
            }
            Err(failure) => failed(session, payload, mode, failure, participant_name),
        };
        self.finish(inner, terminal)
    }

    async fn settle(
        &self,
        worker: JoinHandle<ScanStep>,
        session: SessionId,
        stage: RemoteStage,
    ) -> ScanStep {
        let err = match worker.await {
            Ok(step) => return step,
            Err(err) => err,
        };

        let inner = self.inner.lock().await;
        let (payload, mode, participant_name) = match &inner.session {
            Some(active) if active.id == session => (
                active.payload.clone(),
                active.mode,
                active.participant_name(),
            ),
            _ => return ScanStep::Ignored(IgnoreReason::StaleDecision),
        };
        let failure = ScanFailure::UnexpectedFailure {
            stage,
            detail: format!("directory worker stopped: {err}"),
        };
        let terminal = failed(session, payload, mode, failure, participant_name);
        self.finish(inner, terminal)
    }

    fn finish(&self, mut inner: MutexGuard<'_, ControllerState>, terminal: Terminal) -> ScanStep {
        let session = terminal.session();
        let notice = Notice::for_terminal(&terminal);
        let appended = terminal
            .record()
            .map(|record| self.history.append(record.clone()));

        inner.session = None;
        inner.last_terminal = Some(terminal.clone());
        inner.last_notice = Some(notice.clone());
        drop(inner);

        info!(
            session = session.0,
            outcome = ?terminal.outcome(),
            recorded = appended.is_some(),
            "scan session finished"
        );
        if let Some(record) = appended {
            self.emit(ControllerEvent::RecordAppended(record));
        }
        self.emit(ControllerEvent::PhaseChanged {
            session,
            phase: SessionPhase::Terminal(terminal.outcome()),
        });
        self.emit(ControllerEvent::Notice(notice));
        self.emit(ControllerEvent::PhaseChanged {
            session,
            phase: SessionPhase::Idle,
        });
        ScanStep::Finished(terminal)
    }

    fn emit(&self, event: ControllerEvent) {
        let _ = self.events.send(event);
    }
}

fn failed(
    session: SessionId,
    payload: String,
    mode: Mode,
    failure: ScanFailure,
    participant_name: Option<String>,
) -> Terminal {
    match &failure {
        ScanFailure::UnexpectedFailure { stage, detail } => {
            error!(session = session.0, stage = ?stage, %detail, "unexpected scan failure");
        }
        ScanFailure::TransportError { stage, detail } => {
            warn!(session = session.0, stage = ?stage, %detail, "directory unreachable");
        }
        other => {
            warn!(session = session.0, failure = %other, "scan rejected");
        }
    }

    Terminal::Failed {
        session,
        record: ScanRecord::new(payload, ScanOutcome::Invalid, mode, participant_name),
        failure,
    }
}

async fn guarded<T>(
    stage: RemoteStage,
    call: impl Future<Output = Result<T, DirectoryError>>,
) -> Result<T, ScanFailure> {
    match AssertUnwindSafe(call).catch_unwind().await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(err)) => Err(ScanFailure::from_directory_error(stage, err)),
        Err(panic) => Err(ScanFailure::UnexpectedFailure {
            stage,
            detail: panic_message(panic.as_ref()),
        }),
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "directory call panicked".to_string()
    }
}

#[cfg(test)]
#[path = "tests/controller_tests.rs"]
mod tests;
