//! Output rendering helpers for CLI surfaces.
//!
//! Results go to stdout either as a JSON envelope or as plain text. Logs and
//! prompts use stderr so stdout stays parseable.

use crate::core::error::WakeguardError;
use serde_json::Value as JsonValue;

#[derive(Copy, Clone, Debug, Eq, PartialEq, Default, clap::ValueEnum)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

/// Collapse newlines/extra whitespace and bound length for terminal display.
pub fn compact_line(input: &str, max_chars: usize) -> String {
    let collapsed = input.split_whitespace().collect::<Vec<_>>().join(" ");
    let mut chars = collapsed.chars();
    let preview: String = chars.by_ref().take(max_chars).collect();
    if chars.next().is_some() {
        format!("{}...", preview)
    } else {
        preview
    }
}

/// Print `envelope` as pretty JSON or `text` as-is, per `format`.
pub fn emit(format: OutputFormat, envelope: &JsonValue, text: &str) -> Result<(), WakeguardError> {
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(envelope)?),
        OutputFormat::Text => {
            let text = text.trim_end();
            if !text.is_empty() {
                println!("{}", text);
            }
        }
    }
    Ok(())
}
