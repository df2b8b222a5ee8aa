//! Scanner workflow core: directory client, scan history and the session
//! controller that ties them together.

pub mod controller;
pub mod directory;
pub mod history;
pub mod notice;

pub use controller::{
    Confirmation, ControllerEvent, ControllerSnapshot, DecisionChoice, IgnoreReason,
    ModeSwitchError, OperatorDecision, RemoteStage, ScanFailure, ScanSessionController, ScanStep,
    SessionId, SessionPhase, SessionState, Terminal,
};
pub use directory::{
    DirectoryClient, DirectoryError, HttpDirectoryClient, Participant, Registration, StatusFlags,
    Validation,
};
pub use history::{HistorySummary, ModeTally, ScanHistory, ScanRecord};
pub use notice::{ConfirmationPrompt, Notice, NoticeKind};
