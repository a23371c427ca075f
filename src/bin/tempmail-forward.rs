//! MTA pipe transport: reads one raw message from stdin and forwards it to
//! the ingestion webhook.
//!
//! Usage: `tempmail-forward [recipient] [sender]`
//!
//! Recipient and sender fall back to the `ORIGINAL_RECIPIENT`/`RECIPIENT` and
//! `SENDER` environment variables set by pipe transports. Exits 0 whenever
//! the message was read, whatever happens downstream, so the MTA never
//! bounces it. A missing or invalid `WEBHOOK_URL` exits with `EX_TEMPFAIL`
//! so the MTA keeps the message queued.

use anyhow::Context;
use tokio::io::AsyncReadExt;

use tempmail::config::EdgeConfig;
use tempmail::edge::EdgeForwarder;
use tempmail::error::Error;

/// sysexits.h: temporary failure, the MTA will retry.
const EX_TEMPFAIL: i32 = 75;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // stdout belongs to the MTA; log to stderr.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let forwarder = match EdgeConfig::from_env()
        .map_err(Error::from)
        .and_then(|config| EdgeForwarder::new(config).map_err(Error::from))
    {
        Ok(forwarder) => forwarder,
        Err(e) => {
            tracing::error!(error = %e, "Temporary server error");
            std::process::exit(EX_TEMPFAIL);
        }
    };

    let mut args = std::env::args().skip(1);
    let recipient = args
        .next()
        .or_else(|| std::env::var("ORIGINAL_RECIPIENT").ok())
        .or_else(|| std::env::var("RECIPIENT").ok())
        .unwrap_or_default();
    let sender = args
        .next()
        .or_else(|| std::env::var("SENDER").ok())
        .unwrap_or_default();

    let mut raw = Vec::new();
    tokio::io::stdin()
        .read_to_end(&mut raw)
        .await
        .context("reading message from stdin")?;

    let report = forwarder.forward(&raw, &recipient, &sender).await;
    if !report.delivered {
        tracing::warn!(
            attempts = report.attempts,
            status = ?report.status,
            "Message accepted but not delivered to webhook"
        );
    }

    Ok(())
}
