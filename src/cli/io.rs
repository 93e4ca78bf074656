//! Terminal I/O for CLI commands
//!
//! - Status output: one JSON object per line on stdout
//! - Publish input: raw bytes from stdin

use std::io::{self, Read, Write};

use serde_json::Value;

use super::errors::CliResult;

/// Read all of stdin as a payload
pub fn read_stdin() -> CliResult<Vec<u8>> {
    let mut payload = Vec::new();
    io::stdin().lock().read_to_end(&mut payload)?;
    Ok(payload)
}

/// Write a success response to stdout
pub fn write_response(data: Value) -> CliResult<()> {
    let response = serde_json::json!({
        "status": "ok",
        "data": data
    });
    write_json(&response)
}

/// Write one JSON value as a line on stdout
pub fn write_json(value: &Value) -> CliResult<()> {
    let mut stdout = io::stdout().lock();
    serde_json::to_writer(&mut stdout, value)?;
    writeln!(stdout)?;
    stdout.flush()?;
    Ok(())
}
