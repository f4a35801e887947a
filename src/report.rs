//! Diff output
//!
//! The diff goes to stdout as pretty JSON, four-space indented, non-ASCII
//! left unescaped.

use crate::error::AppError;
use crate::snapshot::Diff;
use serde::Serialize;
use serde_json::ser::{PrettyFormatter, Serializer};

pub fn render_json(diff: &Diff) -> Result<String, AppError> {
    let mut out = Vec::new();
    let formatter = PrettyFormatter::with_indent(b"    ");
    let mut serializer = Serializer::with_formatter(&mut out, formatter);
    diff.serialize(&mut serializer)?;

    String::from_utf8(out).map_err(|e| AppError::Format(e.to_string()))
}
