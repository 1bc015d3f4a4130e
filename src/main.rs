use std::io::Write;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{bail, Context};
use async_trait::async_trait;
use clap::Parser;
use secrecy::SecretString;
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{error, info, warn, Level};

use cadence_core::tools::{ToolChannel, ToolError};
use cadence_engine::{ChatSession, OutputSink, ToolRegistry, TurnOrchestrator};
use cadence_llm::{ClientConfig, OpenAiCompatClient, RequestParams};
use cadence_settings::{load_settings_from_path, settings_path, CadenceSettings};
use cadence_telemetry::{init_telemetry, parse_level, TelemetryConfig};

/// Talk to an OpenAI-compatible model one line at a time. Each stdin line
/// is a final transcript; replies print sentence by sentence.
#[derive(Debug, Parser)]
#[command(name = "cadence", version)]
struct Cli {
    /// Settings file. Defaults to ~/.cadence/settings.json.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Emit JSON log lines on stderr.
    #[arg(long)]
    json_logs: bool,
}

/// Prints sentences on one line per segment.
#[derive(Default)]
struct StdoutSink {
    /// Set once a write error has been logged.
    write_failed: AtomicBool,
}

impl StdoutSink {
    fn write_segment(&self, out: &mut impl Write, text: &str, end_of_segment: bool) {
        let result = (|| {
            if !text.is_empty() {
                write!(out, "{text} ")?;
            }
            if end_of_segment {
                writeln!(out)?;
            }
            out.flush()
        })();
        self.report(result);
    }

    fn report(&self, result: std::io::Result<()>) {
        if let Err(e) = result {
            if !self.write_failed.swap(true, Ordering::Relaxed) {
                warn!(error = %e, "stdout write failed, further output is discarded");
            }
        }
    }
}

impl OutputSink for StdoutSink {
    fn send_text(&self, text: &str, end_of_segment: bool) {
        self.write_segment(&mut std::io::stdout().lock(), text, end_of_segment);
    }

    fn flush(&self) {
        let result = writeln!(std::io::stdout().lock(), "[flushed]");
        self.report(result);
    }
}

/// No tool executor is attached to the CLI.
struct NoToolExecutor;

#[async_trait]
impl ToolChannel for NoToolExecutor {
    async fn call_tool(&self, name: &str, _arguments: &str) -> Result<Value, ToolError> {
        Err(ToolError::Unavailable(format!("no executor for {name}")))
    }
}

fn client_config(settings: &CadenceSettings) -> ClientConfig {
    let llm = &settings.llm;
    ClientConfig {
        base_url: llm.base_url.clone(),
        api_key: SecretString::from(llm.api_key.clone()),
        params: RequestParams {
            model: llm.model.clone(),
            max_tokens: llm.max_tokens,
            temperature: llm.temperature,
            top_p: llm.top_p,
            prompt: llm.prompt.clone(),
        },
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let path = cli.config.unwrap_or_else(settings_path);
    let settings = load_settings_from_path(&path)
        .with_context(|| format!("failed to load settings from {}", path.display()))?;

    init_telemetry(&TelemetryConfig {
        log_level: parse_level(&settings.logging.level).unwrap_or(Level::INFO),
        module_levels: Vec::new(),
        json: settings.logging.json || cli.json_logs,
    })?;

    if settings.llm.api_key.is_empty() {
        error!("no API key configured (set CADENCE_API_KEY or llm.apiKey)");
        bail!("missing API key");
    }

    let client = OpenAiCompatClient::new(client_config(&settings))?;
    info!(
        endpoint = client.endpoint(),
        model = %settings.llm.model,
        max_memory_length = settings.chat.max_memory_length,
        "cadence ready"
    );

    let orchestrator = TurnOrchestrator::new(
        Arc::new(client),
        ToolRegistry::new().into_shared(),
        Arc::new(NoToolExecutor),
        Arc::new(StdoutSink::default()),
        settings.chat.max_memory_length,
    );
    let session = ChatSession::new(orchestrator, settings.chat.greeting.clone());
    session.on_user_joined();

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = tokio::select! {
            line = lines.next_line() => line.context("failed to read stdin")?,
            _ = tokio::signal::ctrl_c() => {
                info!("interrupted");
                session.flush();
                break;
            }
        };
        let Some(line) = line else {
            session.idle().await;
            break;
        };
        match line.trim() {
            "/quit" => break,
            "/flush" => session.flush(),
            "/join" => session.on_user_joined(),
            "/leave" => session.on_user_left(),
            text => session.on_text(text, true),
        }
    }

    session.on_user_left();
    session.shutdown().await;
    info!("shutting down");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    struct BrokenPipe;

    impl Write for BrokenPipe {
        fn write(&mut self, _buf: &[u8]) -> std::io::Result<usize> {
            Err(std::io::ErrorKind::BrokenPipe.into())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Err(std::io::ErrorKind::BrokenPipe.into())
        }
    }

    #[test]
    fn write_error_is_recorded_once() {
        let sink = StdoutSink::default();
        sink.write_segment(&mut BrokenPipe, "hello", true);
        assert!(sink.write_failed.load(Ordering::Relaxed));
        sink.write_segment(&mut BrokenPipe, "again", false);
        assert!(sink.write_failed.load(Ordering::Relaxed));
    }

    #[test]
    fn segment_is_space_separated_with_newline_at_end() {
        let sink = StdoutSink::default();
        let mut out = Vec::new();
        sink.write_segment(&mut out, "One.", false);
        sink.write_segment(&mut out, "Two.", true);
        assert_eq!(String::from_utf8(out).unwrap(), "One. Two. \n");
        assert!(!sink.write_failed.load(Ordering::Relaxed));
    }
}
