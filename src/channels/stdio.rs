//! JSON-lines channel over the process's stdin/stdout.
//!
//! Each stdin line is either a full envelope `{"source": "...", "data": ...}`
//! or a bare payload, which is attributed to `default_source`. Outbound calls
//! are written to stdout one JSON object per line.

use anyhow::Context;
use async_trait::async_trait;
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use super::traits::{CommandChannel, InboundEnvelope, OutboundCall};

pub struct StdioChannel {
    default_source: String,
    stdout: tokio::sync::Mutex<tokio::io::Stdout>,
}

impl StdioChannel {
    pub fn new(default_source: impl Into<String>) -> Self {
        Self {
            default_source: default_source.into(),
            stdout: tokio::sync::Mutex::new(tokio::io::stdout()),
        }
    }
}

/// Parse one input line. Blank lines yield `None`.
pub fn parse_line(line: &str, default_source: &str) -> anyhow::Result<Option<InboundEnvelope>> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }
    let value: Value = serde_json::from_str(trimmed).context("stdin line is not valid JSON")?;
    let envelope = match value {
        Value::Object(mut map) if map.contains_key("source") && map.contains_key("data") => {
            let source = match map.remove("source") {
                Some(Value::String(s)) => s,
                _ => default_source.to_string(),
            };
            InboundEnvelope::new(source, map.remove("data").unwrap_or(Value::Null))
        }
        other => InboundEnvelope::new(default_source, other),
    };
    Ok(Some(envelope))
}

#[async_trait]
impl CommandChannel for StdioChannel {
    fn name(&self) -> &str {
        "stdio"
    }

    async fn send(&self, call: &OutboundCall) -> anyhow::Result<()> {
        let mut line = serde_json::to_string(call)?;
        line.push('\n');
        let mut stdout = self.stdout.lock().await;
        stdout.write_all(line.as_bytes()).await?;
        stdout.flush().await?;
        Ok(())
    }

    async fn listen(&self, tx: mpsc::Sender<InboundEnvelope>) -> anyhow::Result<()> {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        while let Some(line) = lines.next_line().await? {
            match parse_line(&line, &self.default_source) {
                Ok(Some(envelope)) => {
                    if tx.send(envelope).await.is_err() {
                        break;
                    }
                }
                Ok(None) => {}
                Err(e) => warn!("stdio channel: skipping line: {e}"),
            }
        }
        debug!("stdio channel: stdin closed");
        Ok(())
    }
}
