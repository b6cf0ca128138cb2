use crate::exit_codes;
use serde::Serialize;
use std::io::{self, Write};

/// One JSON document: indented for people, a single line for JSONL streams
fn render<T: Serialize>(value: &T, compact: bool) -> Result<String, String> {
    let rendered = if compact {
        serde_json::to_string(value)
    } else {
        serde_json::to_string_pretty(value)
    };
    rendered.map_err(|e| format!("JSON serialization failed: {}", e))
}

fn print_line(json: &str) -> Result<(), String> {
    let mut stdout = io::stdout().lock();
    writeln!(stdout, "{}", json).map_err(|e| format!("Failed to write to stdout: {}", e))
}

/// Print `value` as JSON on stdout, returning the exit code
pub fn print_json<T: Serialize>(value: &T, compact: bool) -> i32 {
    match render(value, compact).and_then(|json| print_line(&json)) {
        Ok(()) => exit_codes::SUCCESS,
        Err(e) => {
            eprintln!("Error: {}", e);
            exit_codes::EXECUTION_ERROR
        }
    }
}
