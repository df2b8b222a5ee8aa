use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Operation the scanner is registering against the remote directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    /// Check-in / admission control.
    Entrada,
    /// Physical document (passport) handover.
    Entrega,
}

impl Mode {
    pub fn as_str(self) -> &'static str {
        match self {
            Mode::Entrada => "entrada",
            Mode::Entrega => "entrega",
        }
    }

    /// Banner shown while the mode is active.
    pub fn label(self) -> &'static str {
        match self {
            Mode::Entrada => "CONTROL DE ENTRADA",
            Mode::Entrega => "ENTREGA DE PASAPORTE",
        }
    }

    /// Tag used by the history log.
    pub fn short_label(self) -> &'static str {
        match self {
            Mode::Entrada => "ENTRADA",
            Mode::Entrega => "ENTREGA",
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ModeParseError {
    #[error("mode '{0}' is deprecated and no longer supported")]
    Deprecated(String),
    #[error("unknown mode '{0}' (expected entrada or entrega)")]
    Unknown(String),
}

impl FromStr for Mode {
    type Err = ModeParseError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let normalized = raw.trim().to_ascii_lowercase();
        match normalized.as_str() {
            "entrada" => Ok(Mode::Entrada),
            "entrega" => Ok(Mode::Entrega),
            "sorteo" => Err(ModeParseError::Deprecated(normalized)),
            _ => Err(ModeParseError::Unknown(raw.trim().to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScanOutcome {
    Valid,
    Invalid,
}

impl ScanOutcome {
    pub fn label(self) -> &'static str {
        match self {
            ScanOutcome::Valid => "VÁLIDO",
            ScanOutcome::Invalid => "INVÁLIDO",
        }
    }
}
