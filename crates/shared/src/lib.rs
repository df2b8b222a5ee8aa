//! Vocabulary shared by the scanner core and the operator console.

pub mod domain;
pub mod error;
pub mod protocol;
