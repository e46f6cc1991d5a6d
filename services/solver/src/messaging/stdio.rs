//! JSON-lines bus binding.
//!
//! Each inbound line is one command envelope. Each outbound line wraps a
//! notification envelope with the channel it belongs to:
//!
//! ```text
//! {"channel":"best_solution","message":{"message_type":"solution.best_changed",...}}
//! ```

use callcenter_events::{CommandEnvelope, EventError};
use serde::Serialize;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use super::{decode_command, GatewayError, NotificationEnvelope};

#[derive(Serialize)]
struct OutboundLine<'a> {
    channel: &'a str,
    message: &'a NotificationEnvelope,
}

/// Decodes command lines into `tx` until EOF or the receiver goes away.
///
/// Lines that fail to decode are logged and skipped.
pub async fn read_commands<R>(reader: R, tx: mpsc::Sender<CommandEnvelope>) -> Result<(), GatewayError>
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = reader.lines();
    let mut line_no = 0u64;

    while let Some(line) = lines.next_line().await? {
        line_no += 1;
        if line.trim().is_empty() {
            continue;
        }
        match decode_command(line.as_bytes()) {
            Ok(envelope) => {
                if tx.send(envelope).await.is_err() {
                    debug!("Command receiver dropped, stopping reader");
                    break;
                }
            }
            Err(e) => warn!(line_no, error = %e, "Skipping undecodable command"),
        }
    }
    Ok(())
}

/// Writes notification envelopes as lines until the channel closes.
pub async fn write_notifications<W>(
    mut writer: W,
    mut rx: mpsc::UnboundedReceiver<NotificationEnvelope>,
) -> Result<(), GatewayError>
where
    W: AsyncWrite + Unpin,
{
    while let Some(envelope) = rx.recv().await {
        let line = OutboundLine {
            channel: envelope.payload.channel(),
            message: &envelope,
        };
        let mut json = serde_json::to_string(&line).map_err(EventError::from)?;
        json.push('\n');
        writer.write_all(json.as_bytes()).await?;
        writer.flush().await?;
    }
    Ok(())
}
