//! Output formatting shared by every command

use anyhow::Result;
use serde::Serialize;

pub const SCHEMA_VERSION: &str = "1.0";

/// Human-readable text or a JSON envelope on stdout
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputFormat {
    #[default]
    Human,
    Json,
}

impl OutputFormat {
    #[must_use]
    pub const fn from_json_flag(json: bool) -> Self {
        if json {
            Self::Json
        } else {
            Self::Human
        }
    }

    #[must_use]
    pub const fn is_json(&self) -> bool {
        matches!(self, Self::Json)
    }
}

/// Wrapper around every JSON response
#[derive(Debug, Clone, Serialize)]
pub struct Envelope<T> {
    /// Response kind, e.g. `backlog://claim-response/v1`
    #[serde(rename = "$schema")]
    pub schema: String,
    #[serde(rename = "_schema_version")]
    pub schema_version: String,
    /// False for typed non-success outcomes
    pub success: bool,
    pub data: T,
}

impl<T: Serialize> Envelope<T> {
    pub fn new(kind: &str, success: bool, data: T) -> Self {
        Self {
            schema: format!("backlog://{kind}-response/v1"),
            schema_version: SCHEMA_VERSION.to_string(),
            success,
            data,
        }
    }
}

/// Print `data` as a pretty JSON envelope
pub fn print_json<T: Serialize>(kind: &str, success: bool, data: T) -> Result<()> {
    let envelope = Envelope::new(kind, success, data);
    println!("{}", serde_json::to_string_pretty(&envelope)?);
    Ok(())
}
