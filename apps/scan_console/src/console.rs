//! Line-oriented operator console: stdin stands in for the camera and the
//! alert dialogs.

use std::sync::Arc;

use anyhow::{Context, Result};
use scan_core::{
    ConfirmationPrompt, ControllerEvent, DecisionChoice, IgnoreReason, Notice, NoticeKind,
    OperatorDecision, ScanHistory, ScanSessionController, ScanStep,
};
use shared::domain::{Mode, ModeParseError, ScanOutcome};
use tokio::{
    io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt},
    sync::broadcast::{self, error::RecvError},
};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsoleCommand {
    Empty,
    Quit,
    ShowHistory,
    SelectMode(Mode),
    InvalidMode(ModeParseError),
    Unknown(String),
    Scan(String),
}

const COMMAND_PREFIX: char = ':';

/// Console commands start with `:`; every other non-empty line is a payload
/// and is forwarded as decoded.
pub fn parse_command(line: &str) -> ConsoleCommand {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return ConsoleCommand::Empty;
    }
    let Some(command) = trimmed.strip_prefix(COMMAND_PREFIX) else {
        return ConsoleCommand::Scan(line.trim_end_matches(['\r', '\n']).to_string());
    };

    let mut words = command.trim_start().splitn(2, char::is_whitespace);
    let head = words.next().unwrap_or_default().to_ascii_lowercase();
    let rest = words.next().map(str::trim);

    match (head.as_str(), rest) {
        ("quit" | "exit" | "salir", None) => ConsoleCommand::Quit,
        ("history" | "historial", None) => ConsoleCommand::ShowHistory,
        ("mode" | "modo", Some(raw)) => match raw.parse::<Mode>() {
            Ok(mode) => ConsoleCommand::SelectMode(mode),
            Err(err) => ConsoleCommand::InvalidMode(err),
        },
        ("mode" | "modo", None) => {
            ConsoleCommand::InvalidMode(ModeParseError::Unknown(String::new()))
        }
        _ => ConsoleCommand::Unknown(trimmed.to_string()),
    }
}

pub fn parse_decision(answer: &str) -> DecisionChoice {
    match answer.trim().to_ascii_lowercase().as_str() {
        "s" | "si" | "sí" | "y" | "yes" | "registrar" => DecisionChoice::Confirm,
        _ => DecisionChoice::Cancel,
    }
}

pub fn render_notice(notice: &Notice) -> String {
    let marker = match notice.kind {
        NoticeKind::Success => "[OK]",
        NoticeKind::Error => "[ERROR]",
        NoticeKind::Info => "[INFO]",
    };
    format!("{marker} {}\n{}\n", notice.title, notice.message)
}

pub fn render_prompt(prompt: &ConfirmationPrompt) -> String {
    format!(
        "== {} ==\n{}\n{} [s/N]: ",
        prompt.title, prompt.message, prompt.confirm_label
    )
}

pub fn render_history(history: &ScanHistory) -> String {
    if history.is_empty() {
        return "Sin escaneos hoy\nLos escaneos aparecerán aquí\n".to_string();
    }

    let mut out = String::new();
    for (ordinal, record) in history.numbered() {
        let marker = match record.outcome() {
            ScanOutcome::Valid => "✓",
            ScanOutcome::Invalid => "✗",
        };
        out.push_str(&format!(
            "#{ordinal} {marker} {} {} {} {}",
            record.timestamp(),
            record.mode().short_label(),
            record.outcome().label(),
            record.raw_payload(),
        ));
        if let Some(name) = record.participant_name() {
            out.push_str(&format!(" - {name}"));
        }
        out.push('\n');
    }

    let summary = history.summary();
    out.push_str(&format!(
        "Total: {} | válidos: {} | inválidos: {}\n",
        summary.total,
        summary.valid(),
        summary.invalid()
    ));
    out
}

fn describe_ignored(reason: IgnoreReason) -> &'static str {
    match reason {
        IgnoreReason::NoModeSelected => {
            "Selecciona un modo de escaneo para comenzar (:mode entrada | :mode entrega)"
        }
        IgnoreReason::Busy(_) => "Procesando el escaneo anterior, espera un momento",
        IgnoreReason::NoPendingConfirmation | IgnoreReason::StaleDecision => {
            "No hay ningún registro pendiente de confirmación"
        }
    }
}

/// Drives the controller from operator input until `:quit` or end of input.
pub async fn run<R, W>(controller: Arc<ScanSessionController>, input: R, mut out: W) -> Result<()>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut lines = input.lines();
    let banner = match controller.mode().await {
        Some(mode) => format!("Sistema Listo - MODO ACTIVO: {}\n", mode.label()),
        None => format!("Sistema Listo\n{}\n", describe_ignored(IgnoreReason::NoModeSelected)),
    };
    write_out(&mut out, &banner).await?;

    while let Some(line) = lines
        .next_line()
        .await
        .context("failed to read operator input")?
    {
        match parse_command(&line) {
            ConsoleCommand::Empty => continue,
            ConsoleCommand::Quit => break,
            ConsoleCommand::ShowHistory => {
                write_out(&mut out, &render_history(controller.history())).await?;
            }
            ConsoleCommand::SelectMode(mode) => {
                let reply = match controller.select_mode(mode).await {
                    Ok(()) => format!("MODO ACTIVO: {}\n", mode.label()),
                    Err(err) => format!("{err}\n"),
                };
                write_out(&mut out, &reply).await?;
            }
            ConsoleCommand::InvalidMode(err) => {
                write_out(&mut out, &format!("{err}\n")).await?;
            }
            ConsoleCommand::Unknown(command) => {
                let reply = format!(
                    "comando desconocido '{command}' (:mode <entrada|entrega>, :history, :quit)\n"
                );
                write_out(&mut out, &reply).await?;
            }
            ConsoleCommand::Scan(payload) => {
                let mut step = controller.payload_decoded(payload).await;
                loop {
                    match step {
                        ScanStep::AwaitingConfirmation(confirmation) => {
                            let prompt = ConfirmationPrompt::for_confirmation(&confirmation);
                            write_out(&mut out, &render_prompt(&prompt)).await?;
                            let answer = lines
                                .next_line()
                                .await
                                .context("failed to read operator decision")?
                                .unwrap_or_default();
                            let decision = OperatorDecision {
                                session: confirmation.session,
                                choice: parse_decision(&answer),
                            };
                            step = controller.decide(decision).await;
                        }
                        ScanStep::Finished(terminal) => {
                            let notice = Notice::for_terminal(&terminal);
                            write_out(&mut out, &render_notice(&notice)).await?;
                            break;
                        }
                        ScanStep::Ignored(reason) => {
                            write_out(&mut out, &format!("{}\n", describe_ignored(reason)))
                                .await?;
                            break;
                        }
                    }
                }
            }
        }
    }

    out.flush().await.context("failed to flush console output")?;
    Ok(())
}

async fn write_out<W: AsyncWrite + Unpin>(out: &mut W, text: &str) -> Result<()> {
    out.write_all(text.as_bytes())
        .await
        .context("failed to write console output")
}

pub fn spawn_event_logger(mut events: broadcast::Receiver<ControllerEvent>) {
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => log_event(&event),
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "controller event logger lagged");
                }
                Err(RecvError::Closed) => break,
            }
        }
    });
}

fn log_event(event: &ControllerEvent) {
    match event {
        ControllerEvent::ModeChanged(mode) => info!(mode = %mode, "mode changed"),
        ControllerEvent::PhaseChanged { session, phase } => {
            debug!(session = session.0, phase = ?phase, "session phase changed");
        }
        ControllerEvent::ConfirmationRequested(confirmation) => debug!(
            session = confirmation.session.0,
            participant = %confirmation.participant.name,
            "confirmation requested"
        ),
        ControllerEvent::RecordAppended(record) => info!(
            id = %record.id(),
            recorded_at = %record.recorded_at(),
            outcome = ?record.outcome(),
            mode = %record.mode(),
            "scan recorded"
        ),
        ControllerEvent::Notice(notice) => {
            debug!(kind = ?notice.kind, title = %notice.title, "notice shown");
        }
    }
}

#[cfg(test)]
#[path = "tests/console_tests.rs"]
mod tests;
