//! JSON-lines message plumbing.
//!
//! Inbound: a Unix socket accepting one `InboundMessage` per line, tagged by
//! `channel`. Outbound: every `OutboundEvent` is written as a JSON line to
//! stdout and fed back to whichever component consumes it.

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixListener;

use crate::core::{InboundMessage, OutboundEvent};
use crate::execution::RouterInput;
use crate::risk::guardian::GuardianInput;

/// Routing targets for decoded messages.
#[derive(Clone)]
pub struct Channels {
    pub guardian: flume::Sender<GuardianInput>,
    pub router: flume::Sender<RouterInput>,
}

impl Channels {
    /// Hand one inbound message to its consumer.
    pub async fn dispatch(&self, msg: InboundMessage) -> crate::core::Result<()> {
        match msg {
            InboundMessage::ApprovedSignal(signal) => {
                self.guardian.send_async(GuardianInput::Signal(signal)).await?
            }
            InboundMessage::OperatorCommand(cmd) => {
                self.guardian.send_async(GuardianInput::Operator(cmd)).await?
            }
            InboundMessage::MarketPrice(price) => self.router.send_async(RouterInput::Price(price)).await?,
            InboundMessage::ExecutionResult(result) => {
                self.router.send_async(RouterInput::Execution(result)).await?
            }
        }
        Ok(())
    }

    /// Feed an outbound event back into the pipeline. Approved orders and
    /// control commands go to the router; fills and snapshots to the guardian.
    pub async fn feed_back(&self, event: &OutboundEvent) -> crate::core::Result<()> {
        match event {
            OutboundEvent::ApprovedOrder(order) => {
                self.router.send_async(RouterInput::Order(order.clone())).await?
            }
            OutboundEvent::ControlCommand(cmd) => {
                self.router.send_async(RouterInput::Control(cmd.clone())).await?
            }
            OutboundEvent::FillEvent(fill) => self.guardian.send_async(GuardianInput::Fill(fill.clone())).await?,
            OutboundEvent::PortfolioSnapshot(snap) => {
                self.guardian.send_async(GuardianInput::Snapshot(snap.clone())).await?
            }
            OutboundEvent::OrderRejected(_) => {}
        }
        Ok(())
    }
}

/// Publish every outbound event and route it onward until all producers are gone.
pub async fn fan_out(events: flume::Receiver<OutboundEvent>, channels: Channels, publish_stdout: bool) {
    let mut stdout = tokio::io::stdout();
    while let Ok(event) = events.recv_async().await {
        if publish_stdout {
            match serde_json::to_string(&event) {
                Ok(line) => {
                    if let Err(e) = stdout.write_all(format!("{}\n", line).as_bytes()).await {
                        tracing::warn!("stdout publish failed: {}", e);
                    }
                }
                Err(e) => tracing::warn!("Event serialization failed: {}", e),
            }
        }
        if let Err(e) = channels.feed_back(&event).await {
            tracing::error!("Pipeline channel closed: {}", e);
            break;
        }
    }
}

/// Remove a socket file left by a previous run. Returns whether one was removed.
fn clear_stale_socket(socket_path: &str) -> bool {
    match std::fs::remove_file(socket_path) {
        Ok(()) => true,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => false,
        Err(e) => {
            tracing::debug!("Could not remove stale socket {}: {}", socket_path, e);
            false
        }
    }
}

/// Listen on a Unix socket and dispatch decoded inbound messages.
pub async fn listen(socket_path: String, channels: Channels) -> anyhow::Result<()> {
    clear_stale_socket(&socket_path);
    let listener = UnixListener::bind(&socket_path)?;
    tracing::info!("IPC listener: {}", socket_path);
    loop {
        let (stream, _) = listener.accept().await?;
        let channels = channels.clone();
        tokio::spawn(async move {
            let reader = BufReader::new(stream);
            let mut lines = reader.lines();
            while let Ok(Some(line)) = lines.next_line().await {
                if line.trim().is_empty() {
                    continue;
                }
                match serde_json::from_str::<InboundMessage>(&line) {
                    Ok(msg) => {
                        if let Err(e) = channels.dispatch(msg).await {
                            tracing::error!("Dispatch failed: {}", e);
                            return;
                        }
                    }
                    Err(e) => tracing::warn!("Malformed message skipped: {}", e),
                }
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{ControlCommand, ControlKind, MarketPrice, Symbol};
    use rust_decimal_macros::dec;
    use tokio::net::UnixStream;

    fn channels() -> (Channels, flume::Receiver<GuardianInput>, flume::Receiver<RouterInput>) {
        let (g_tx, g_rx) = flume::unbounded();
        let (r_tx, r_rx) = flume::unbounded();
        (
            Channels {
                guardian: g_tx,
                router: r_tx,
            },
            g_rx,
            r_rx,
        )
    }

    #[tokio::test]
    async fn test_dispatch_by_channel() {
        let (ch, g_rx, r_rx) = channels();
        ch.dispatch(InboundMessage::MarketPrice(MarketPrice {
            symbol: Symbol::new("spy"),
            price: dec!(101),
        }))
        .await
        .unwrap();
        assert!(matches!(r_rx.try_recv().unwrap(), RouterInput::Price(_)));
        assert!(g_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_control_commands_reach_router() {
        let (ch, _g_rx, r_rx) = channels();
        let cmd = ControlCommand::new(ControlKind::LiquidateAll, "a".into(), "test");
        ch.feed_back(&OutboundEvent::ControlCommand(cmd)).await.unwrap();
        assert!(matches!(r_rx.try_recv().unwrap(), RouterInput::Control(_)));
    }

    #[test]
    fn test_clear_stale_socket() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("arena.sock");
        let path_str = path.to_str().unwrap();
        assert!(!clear_stale_socket(path_str));

        std::fs::write(&path, b"").unwrap();
        assert!(clear_stale_socket(path_str));
        assert!(!path.exists());

        // a directory cannot be unlinked as a file: reported, not removed
        assert!(!clear_stale_socket(dir.path().to_str().unwrap()));
        assert!(dir.path().exists());
    }

    #[tokio::test]
    async fn test_socket_skips_malformed_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("arena.sock").to_string_lossy().to_string();
        let (ch, g_rx, _r_rx) = channels();
        tokio::spawn(listen(path.clone(), ch));

        let mut stream = loop {
            match UnixStream::connect(&path).await {
                Ok(s) => break s,
                Err(_) => tokio::time::sleep(std::time::Duration::from_millis(10)).await,
            }
        };
        let payload = concat!(
            "not json\n",
            r#"{"channel":"operator_command","payload":{"command":"RESET_KILL_SWITCH","contender_id":"a"}}"#,
            "\n"
        );
        stream.write_all(payload.as_bytes()).await.unwrap();

        let input = tokio::time::timeout(std::time::Duration::from_secs(2), g_rx.recv_async())
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(input, GuardianInput::Operator(_)));
    }
}
