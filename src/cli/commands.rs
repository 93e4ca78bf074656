//! CLI command implementations
//!
//! `init`, `start` and `dump` work on the data directory named by the
//! config file. `publish` and `tail` are thin clients of a running broker.

use std::fs;
use std::path::Path;

use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde_json::{json, Value};
use tokio::runtime::Runtime;

use crate::broker::{Broker, BrokerConfig};
use crate::client;
use crate::log::{LogEntry, LogReader, LogWriter, LOG_FILE_NAME};
use crate::observability::{Event, Logger};

use super::args::Command;
use super::errors::{CliError, CliResult};
use super::io::{read_stdin, write_json, write_response};

/// Main CLI entry point
///
/// Parses arguments and dispatches to the appropriate command.
/// This is the only function that main.rs should call.
pub fn run() -> CliResult<()> {
    let cli = super::args::Cli::parse_args();
    run_command(cli.command)
}

/// Run the appropriate command based on CLI args
pub fn run_command(cmd: Command) -> CliResult<()> {
    match cmd {
        Command::Init { config, data_dir } => init(&config, &data_dir),
        Command::Start { config } => start(&config),
        Command::Dump { config } => dump(&config),
        Command::Publish { config, message } => publish(&config, message),
        Command::Tail { config } => tail(&config),
    }
}

/// Load and validate the config file
pub fn load_config(config_path: &Path) -> CliResult<BrokerConfig> {
    BrokerConfig::load(config_path).map_err(|e| CliError::config_error(e.to_string()))
}

/// Initialize a data directory
///
/// - Writes a default config pointing at `data_dir` if `config_path` is missing
/// - Creates the data directory and an empty log
/// - Refuses a directory that already holds a log
pub fn init(config_path: &Path, data_dir: &Path) -> CliResult<()> {
    let config_written = !config_path.exists();
    if config_written {
        let config = BrokerConfig::new(data_dir.to_string_lossy());
        let content = serde_json::to_string_pretty(&config)?;
        fs::write(config_path, content).map_err(|e| {
            CliError::config_error(format!("Failed to write config {:?}: {}", config_path, e))
        })?;
    }

    let config = load_config(config_path)?;
    let data_dir = config.data_path();

    if is_initialized(data_dir) {
        return Err(CliError::already_initialized(data_dir));
    }

    fs::create_dir_all(data_dir).map_err(|e| {
        CliError::config_error(format!("Failed to create directory {:?}: {}", data_dir, e))
    })?;
    LogWriter::open(data_dir, config.sync_mode)
        .map_err(|e| CliError::boot_failed(e.to_string()))?;

    write_response(json!({
        "initialized": true,
        "data_dir": config.data_dir,
        "config_written": config_written,
    }))
}

/// Recover the data directory and serve until Ctrl-C
pub fn start(config_path: &Path) -> CliResult<()> {
    let config = load_config(config_path)?;
    if !is_initialized(config.data_path()) {
        return Err(CliError::not_initialized(config.data_path()));
    }

    let path = config_path.display().to_string();
    Logger::event(Event::ConfigLoaded, &[("path", path.as_str())]);

    runtime()?.block_on(async {
        let broker = Broker::start(config).await.map_err(CliError::from_boot)?;
        broker.run().await.map_err(CliError::serve_failed)?;
        Ok::<(), CliError>(())
    })
}

/// Print every record in the log as `{"offset", "length", "payload"}`,
/// payload base64-encoded
pub fn dump(config_path: &Path) -> CliResult<()> {
    let config = load_config(config_path)?;
    if !is_initialized(config.data_path()) {
        return Err(CliError::not_initialized(config.data_path()));
    }

    for line in dump_lines(config.data_path())? {
        write_json(&line)?;
    }
    Ok(())
}

fn dump_lines(data_dir: &Path) -> CliResult<Vec<Value>> {
    let entries = LogReader::open_from_data_dir(data_dir)
        .and_then(|mut reader| reader.read_all())
        .map_err(|e| CliError::log_unreadable(e.to_string()))?;

    Ok(entries.iter().map(entry_json).collect())
}

fn entry_json(entry: &LogEntry) -> Value {
    json!({
        "offset": entry.offset,
        "length": entry.payload.len(),
        "payload": STANDARD.encode(&entry.payload),
    })
}

/// Publish one blob to the broker named by the config
pub fn publish(config_path: &Path, message: Option<String>) -> CliResult<()> {
    let config = load_config(config_path)?;
    let payload = match message {
        Some(message) => message.into_bytes(),
        None => read_stdin()?,
    };

    let addr = config.client_addr();
    runtime()?.block_on(async {
        client::publish(addr.as_str(), config.producer_framing, &payload)
            .await
            .map_err(|e| CliError::client_failed(&addr, e))
    })?;

    write_response(json!({ "acknowledged": true, "bytes": payload.len() }))
}

/// Subscribe and copy pushed payloads to stdout until the broker hangs up
pub fn tail(config_path: &Path) -> CliResult<()> {
    let config = load_config(config_path)?;
    let addr = config.client_addr();

    runtime()?.block_on(async {
        let mut stream = client::subscribe(addr.as_str())
            .await
            .map_err(|e| CliError::client_failed(&addr, e))?;
        let mut stdout = tokio::io::stdout();
        tokio::io::copy(&mut stream, &mut stdout).await?;
        Ok::<(), CliError>(())
    })
}

fn runtime() -> CliResult<Runtime> {
    Runtime::new()
        .map_err(|e| CliError::boot_failed(format!("Failed to create tokio runtime: {}", e)))
}

/// A data directory is initialized once it holds a log file
fn is_initialized(data_dir: &Path) -> bool {
    data_dir.join(LOG_FILE_NAME).exists()
}

#[cfg(test)]
mod tests {
    use super::super::errors::CliErrorCode;
    use super::*;
    use crate::broker::ProducerFraming;
    use tempfile::TempDir;

    fn create_config(temp_dir: &TempDir) -> std::path::PathBuf {
        let config_path = temp_dir.path().join("blobcast.json");
        let data_dir = temp_dir.path().join("data");

        let config = json!({
            "data_dir": data_dir.to_string_lossy()
        });

        fs::write(&config_path, config.to_string()).unwrap();
        config_path
    }

    #[test]
    fn test_init_creates_data_dir_and_log() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = create_config(&temp_dir);
        let data_dir = temp_dir.path().join("data");

        init(&config_path, Path::new("ignored")).unwrap();

        assert!(data_dir.join(LOG_FILE_NAME).exists());
        assert!(!Path::new("ignored").exists());
    }

    #[test]
    fn test_init_writes_default_config() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("blobcast.json");
        let data_dir = temp_dir.path().join("fresh");

        init(&config_path, &data_dir).unwrap();

        let config = load_config(&config_path).unwrap();
        assert_eq!(config.data_path(), data_dir.as_path());
        assert_eq!(config.producer_framing, ProducerFraming::LengthPrefixed);
        assert!(data_dir.join(LOG_FILE_NAME).exists());
    }

    #[test]
    fn test_init_refuses_reinit() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = create_config(&temp_dir);

        init(&config_path, Path::new("ignored")).unwrap();

        let result = init(&config_path, Path::new("ignored"));
        assert_eq!(
            result.unwrap_err().code(),
            &CliErrorCode::AlreadyInitialized
        );
    }

    #[test]
    fn test_start_requires_init() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = create_config(&temp_dir);

        let result = start(&config_path);
        assert_eq!(result.unwrap_err().code(), &CliErrorCode::NotInitialized);
    }

    #[test]
    fn test_invalid_config_rejected() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("blobcast.json");
        let data_dir = temp_dir.path().join("data");

        let config = json!({
            "data_dir": data_dir.to_string_lossy(),
            "merge_queue_capacity": 0
        });
        fs::write(&config_path, config.to_string()).unwrap();

        let result = load_config(&config_path);
        assert_eq!(result.unwrap_err().code(), &CliErrorCode::ConfigError);
    }

    #[test]
    fn test_dump_lines_encode_payloads() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = create_config(&temp_dir);
        init(&config_path, Path::new("ignored")).unwrap();

        let config = load_config(&config_path).unwrap();
        {
            let mut writer = LogWriter::open(config.data_path(), config.sync_mode).unwrap();
            writer.append(b"hello|world").unwrap();
            writer.append(b"").unwrap();
        }

        let lines = dump_lines(config.data_path()).unwrap();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["offset"], 0);
        assert_eq!(lines[0]["length"], 11);
        assert_eq!(lines[0]["payload"], STANDARD.encode(b"hello|world"));
        // "@|^hello||world@|$" is 18 bytes
        assert_eq!(lines[1]["offset"], 18);
        assert_eq!(lines[1]["payload"], "");
    }
}
