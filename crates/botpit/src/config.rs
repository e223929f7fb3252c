use std::path::Path;

use serde::Deserialize;

use crate::error::{PitError, PitResult};
use crate::output::QUEUE_DEFAULT_SIZE;

/// Process-wide configuration, loaded from a single JSON file.
///
/// Construction is the only place the file format is interpreted; everything
/// downstream receives this struct by value (there are no config globals).
#[derive(Clone, Debug, Deserialize)]
pub struct Configs {
    #[serde(rename = "outputHandler")]
    pub output_handler: OutputHandlerConfig,
    #[serde(rename = "turnTimeout")]
    pub turn_timeout: TimeConfig,
    pub client: ClientConfig,
    pub terminal: TerminalConfig,
    pub ui: UiConfig,
}

#[derive(Clone, Debug, Deserialize)]
pub struct OutputHandlerConfig {
    #[serde(rename = "sendToUI")]
    pub send_to_ui: bool,
    /// UI ticker period in milliseconds.
    #[serde(rename = "timeInterval", default)]
    pub time_interval: u64,
    #[serde(rename = "sendToFile")]
    pub send_to_file: bool,
    #[serde(rename = "filePath", default)]
    pub file_path: String,
    /// Number of messages staged before a hand-off to the file writer.
    #[serde(rename = "bufferSize", default)]
    pub buffer_size: usize,
}

#[derive(Clone, Debug, Deserialize)]
pub struct TimeConfig {
    /// Receive window length per turn, milliseconds.
    #[serde(rename = "clientResponseTime")]
    pub client_response_time: u64,
    /// Advisory budget for the simulate step, milliseconds.
    #[serde(rename = "simulateTimeout")]
    pub simulate_timeout: u64,
    /// Fixed turn cadence, milliseconds.
    #[serde(rename = "turnTimeout")]
    pub turn_timeout: u64,
}

#[derive(Clone, Debug, Deserialize)]
pub struct ClientConfig {
    pub port: u16,
}

#[derive(Clone, Debug, Deserialize)]
pub struct TerminalConfig {
    pub token: String,
    pub port: u16,
}

#[derive(Clone, Debug, Deserialize)]
pub struct UiConfig {
    pub enable: bool,
    pub token: String,
    pub port: u16,
}

impl Configs {
    pub fn load(path: impl AsRef<Path>) -> PitResult<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .map_err(|e| PitError::Config(format!("cannot read {}: {e}", path.display())))?;
        let configs: Configs = serde_json::from_str(&raw)
            .map_err(|e| PitError::Config(format!("malformed {}: {e}", path.display())))?;
        configs.validate()?;
        Ok(configs)
    }

    pub fn validate(&self) -> PitResult<()> {
        check_port("client.port", self.client.port)?;
        check_port("terminal.port", self.terminal.port)?;
        check_token("terminal.token", &self.terminal.token)?;
        if self.ui.enable {
            check_port("ui.port", self.ui.port)?;
            check_token("ui.token", &self.ui.token)?;
        }

        let oh = &self.output_handler;
        if oh.send_to_ui && oh.time_interval == 0 {
            return Err(PitError::Config(
                "outputHandler.timeInterval must be positive when sendToUI is set".into(),
            ));
        }
        if oh.send_to_file {
            if oh.file_path.is_empty() {
                return Err(PitError::Config(
                    "outputHandler.filePath is required when sendToFile is set".into(),
                ));
            }
            if oh.buffer_size == 0 || oh.buffer_size > QUEUE_DEFAULT_SIZE {
                return Err(PitError::Config(format!(
                    "outputHandler.bufferSize must be in 1..={QUEUE_DEFAULT_SIZE}"
                )));
            }
        }
        Ok(())
    }
}

fn check_port(key: &str, port: u16) -> PitResult<()> {
    if port == 0 {
        return Err(PitError::Config(format!("{key}: port must be in 1..=65535")));
    }
    Ok(())
}

fn check_token(key: &str, token: &str) -> PitResult<()> {
    if token.len() != 32 || !token.is_ascii() {
        return Err(PitError::Config(format!(
            "{key}: token must be exactly 32 ASCII characters"
        )));
    }
    Ok(())
}
