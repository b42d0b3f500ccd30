use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use chrono::Utc;
use clap::{Parser, Subcommand};
use serde_json::json;
use tokio::io::AsyncBufReadExt;
use tokio::time::Duration;

use parley_core::envelope::DecodedEnvelope;
use parley_core::ids::ParticipantId;
use parley_stream::fragmenter::DEFAULT_MAX_PAYLOAD;
use parley_stream::{Fragmenter, IngestOutcome, Reassembler};
use parley_telemetry::{init_telemetry, TelemetryConfig};

/// Inspect and produce chunked voice-agent chat streams.
#[derive(Parser)]
#[command(name = "parley", version)]
struct Cli {
    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Decode newline-delimited base64 frames from stdin into chat items.
    Decode {
        /// Reassembly timeout in milliseconds.
        #[arg(long, default_value_t = 5000)]
        timeout_ms: u64,
    },
    /// Wrap text into a final user envelope and print its wire frames as
    /// base64 lines.
    Encode {
        text: String,
        /// Stream id stamped on the envelope.
        #[arg(long, default_value = "0")]
        stream_id: String,
        /// Maximum fragment payload length.
        #[arg(long, default_value_t = DEFAULT_MAX_PAYLOAD)]
        max_payload: usize,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_telemetry(&TelemetryConfig {
        json_output: cli.json_logs,
        ..Default::default()
    });

    match cli.command {
        Command::Decode { timeout_ms } => decode(timeout_ms).await,
        Command::Encode {
            text,
            stream_id,
            max_payload,
        } => {
            encode(&text, &stream_id, max_payload);
            Ok(())
        }
    }
}

async fn decode(timeout_ms: u64) -> anyhow::Result<()> {
    let mut reassembler = Reassembler::new(Duration::from_millis(timeout_ms));
    let mut lines = tokio::io::BufReader::new(tokio::io::stdin()).lines();

    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let frame = match BASE64.decode(line) {
            Ok(bytes) => bytes,
            Err(err) => {
                tracing::warn!(%err, "skipping line that is not valid base64");
                continue;
            }
        };
        match reassembler.ingest(&frame) {
            Some(IngestOutcome::Chat(item)) => {
                println!("{}", json!({ "event": "chat", "item": item }));
            }
            Some(IngestOutcome::Action(action)) => {
                println!("{}", json!({ "event": "action", "action": action }));
            }
            Some(IngestOutcome::Failed { message_id, error }) => {
                println!(
                    "{}",
                    json!({
                        "event": "decode_failed",
                        "message_id": message_id,
                        "reason": error.to_string(),
                    })
                );
            }
            Some(IngestOutcome::Suppressed) => {
                tracing::debug!("message decoded to empty text");
            }
            None => {}
        }
    }

    if reassembler.pending_count() > 0 {
        tracing::warn!(
            pending = reassembler.pending_count(),
            "input ended with incomplete messages"
        );
    }
    Ok(())
}

fn encode(text: &str, stream_id: &str, max_payload: usize) {
    let envelope = DecodedEnvelope::user_text(
        text,
        &ParticipantId::from_raw(stream_id),
        Utc::now().timestamp_millis(),
    );
    for frame in Fragmenter::new(max_payload).fragment(&envelope) {
        println!("{}", BASE64.encode(&frame));
    }
}
