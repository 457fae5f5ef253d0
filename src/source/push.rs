use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;
use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::{accept_async, tungstenite::Message};
use tracing::{debug, error, info, warn};

use crate::config::{ACTION_TIMEOUT_MS, CHANNEL_CAPACITY};
use crate::error::{ActionError, Result, SourceError};
use crate::source::messages::{encode_command, parse_agent_frame, AgentCmd, AgentFrame};
use crate::source::TelemetrySource;
use crate::types::{now_ns, GameSnapshot, ViewHandle};

/// Agent's answer to a command.
#[derive(Debug, Clone)]
pub struct Ack {
    pub ok: bool,
    pub error: Option<String>,
}

/// The currently attached agent. A newer connection replaces an older one.
struct AgentLink {
    id: u64,
    cmd_tx: mpsc::Sender<String>,
}

/// Push-fed telemetry: an in-page capture agent connects over a local
/// WebSocket and streams snapshots; commands go back on the same socket.
pub struct PushFeed {
    stale_after: Duration,
    latest: Mutex<Option<GameSnapshot>>,
    page_text: Mutex<Option<String>>,
    link: Mutex<Option<AgentLink>>,
    /// command id → waiting caller
    pending: DashMap<u64, oneshot::Sender<Ack>>,
    next_cmd_id: AtomicU64,
    next_conn_id: AtomicU64,
    frames_received: AtomicU64,
}

impl PushFeed {
    pub fn new(stale_after: Duration) -> Arc<Self> {
        Arc::new(Self {
            stale_after,
            latest: Mutex::new(None),
            page_text: Mutex::new(None),
            link: Mutex::new(None),
            pending: DashMap::new(),
            next_cmd_id: AtomicU64::new(1),
            next_conn_id: AtomicU64::new(1),
            frames_received: AtomicU64::new(0),
        })
    }

    /// Accept agent connections forever.
    pub async fn serve(self: Arc<Self>, listener: TcpListener) {
        loop {
            match listener.accept().await {
                Ok((stream, peer)) => {
                    info!(%peer, "[PUSH] agent connecting");
                    let feed = Arc::clone(&self);
                    tokio::spawn(async move {
                        if let Err(e) = feed.handle_connection(stream).await {
                            warn!("[PUSH] agent connection error: {e}");
                        }
                    });
                }
                Err(e) => {
                    error!("[PUSH] accept failed: {e}");
                    tokio::time::sleep(Duration::from_millis(100)).await;
                }
            }
        }
    }

    async fn handle_connection(&self, stream: TcpStream) -> Result<()> {
        let ws = accept_async(stream).await?;
        let (mut write, mut read) = ws.split();
        let (cmd_tx, mut cmd_rx) = mpsc::channel::<String>(CHANNEL_CAPACITY);
        let conn_id = self.next_conn_id.fetch_add(1, Ordering::Relaxed);
        if let Ok(mut link) = self.link.lock() {
            if link.is_some() {
                info!(conn_id, "[PUSH] newer agent replaces the attached one");
            }
            *link = Some(AgentLink { id: conn_id, cmd_tx });
        }

        let result: Result<()> = loop {
            tokio::select! {
                msg = read.next() => {
                    match msg {
                        Some(Ok(Message::Text(text))) => self.handle_frame(&text),
                        Some(Ok(Message::Ping(data))) => {
                            if let Err(e) = write.send(Message::Pong(data)).await {
                                break Err(e.into());
                            }
                        }
                        Some(Ok(Message::Close(_))) | None => break Ok(()),
                        Some(Err(e)) => break Err(e.into()),
                        Some(Ok(_)) => {}
                    }
                }
                cmd = cmd_rx.recv() => {
                    match cmd {
                        Some(text) => {
                            if let Err(e) = write.send(Message::Text(text.into())).await {
                                break Err(e.into());
                            }
                        }
                        None => break Ok(()),
                    }
                }
            }
        };

        if let Ok(mut link) = self.link.lock() {
            if link.as_ref().map(|l| l.id) == Some(conn_id) {
                *link = None;
            }
        }
        info!(conn_id, "[PUSH] agent disconnected");
        result
    }

    fn handle_frame(&self, text: &str) {
        let total = self.frames_received.fetch_add(1, Ordering::Relaxed) + 1;
        if total % 5_000 == 0 {
            debug!(frames = total, "[PUSH] {total} frames received");
        }
        for frame in parse_agent_frame(text) {
            match frame {
                AgentFrame::Hello { agent, platform } => {
                    info!(
                        agent = agent.as_deref().unwrap_or("?"),
                        platform = platform.as_deref().unwrap_or("?"),
                        "[PUSH] agent attached"
                    );
                }
                AgentFrame::Snapshot { data } => {
                    let snap = data.into_snapshot(now_ns(), Instant::now());
                    if let Ok(mut latest) = self.latest.lock() {
                        *latest = Some(snap);
                    }
                }
                AgentFrame::PageText { text } => {
                    if let Ok(mut page) = self.page_text.lock() {
                        *page = Some(text);
                    }
                }
                AgentFrame::Ack { id, ok, error } => match self.pending.remove(&id) {
                    Some((_, tx)) => {
                        let _ = tx.send(Ack { ok, error });
                    }
                    None => debug!(id, "[PUSH] ack for unknown or expired command"),
                },
            }
        }
    }

    fn is_connected(&self) -> bool {
        self.link.lock().map(|l| l.is_some()).unwrap_or(false)
    }

    fn link_id(&self) -> Option<u64> {
        self.link.lock().ok().and_then(|l| l.as_ref().map(|l| l.id))
    }

    /// Queue a command for the agent without waiting for its ack.
    fn send_command(&self, id: u64, cmd: AgentCmd) -> std::result::Result<(), SourceError> {
        let tx = self
            .link
            .lock()
            .ok()
            .and_then(|l| l.as_ref().map(|l| l.cmd_tx.clone()))
            .ok_or(SourceError::NotConnected)?;
        tx.try_send(encode_command(id, cmd))
            .map_err(|e| SourceError::Transport(format!("agent command queue: {e}")))
    }

    /// Send a command and wait for the agent's ack.
    pub async fn request(&self, cmd: AgentCmd) -> std::result::Result<Ack, ActionError> {
        let id = self.next_cmd_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        self.pending.insert(id, tx);
        if let Err(e) = self.send_command(id, cmd) {
            self.pending.remove(&id);
            return Err(e.into());
        }
        match tokio::time::timeout(Duration::from_millis(ACTION_TIMEOUT_MS), rx).await {
            Ok(Ok(ack)) => Ok(ack),
            Ok(Err(_)) => Err(ActionError::Transport("agent dropped the command".to_string())),
            Err(_) => {
                self.pending.remove(&id);
                Err(ActionError::Timeout(ACTION_TIMEOUT_MS))
            }
        }
    }

    #[cfg(test)]
    pub(crate) fn inject_frame(&self, text: &str) {
        self.handle_frame(text);
    }
}

#[async_trait]
impl TelemetrySource for PushFeed {
    async fn snapshot(&self) -> std::result::Result<GameSnapshot, SourceError> {
        let latest = self.latest.lock().ok().and_then(|l| l.clone());
        match latest {
            Some(snap) if snap.captured_at.elapsed() <= self.stale_after => Ok(snap),
            Some(snap) => Err(SourceError::ViewLost(format!(
                "agent snapshot stale for {}ms",
                snap.captured_at.elapsed().as_millis()
            ))),
            None if self.is_connected() => Err(SourceError::ViewLost("no snapshot from agent yet".to_string())),
            None => Err(SourceError::NotConnected),
        }
    }

    async fn reacquire(&self) -> std::result::Result<ViewHandle, SourceError> {
        let conn = self.link_id().ok_or(SourceError::NotConnected)?;
        // Fresh data from the attached agent is the only proof the view is back.
        self.snapshot().await?;
        Ok(ViewHandle(format!("agent-{conn}")))
    }

    async fn reload(&self) -> std::result::Result<(), SourceError> {
        let id = self.next_cmd_id.fetch_add(1, Ordering::Relaxed);
        self.send_command(id, AgentCmd::Reload)?;
        if let Ok(mut latest) = self.latest.lock() {
            *latest = None;
        }
        Ok(())
    }

    async fn page_text(&self) -> std::result::Result<String, SourceError> {
        if !self.is_connected() {
            return Err(SourceError::NotConnected);
        }
        Ok(self.page_text.lock().ok().and_then(|p| p.clone()).unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn snapshot_requires_an_agent() {
        let feed = PushFeed::new(Duration::from_secs(2));
        assert!(matches!(feed.snapshot().await, Err(SourceError::NotConnected)));
    }

    #[tokio::test]
    async fn injected_snapshot_is_served_until_stale() {
        let feed = PushFeed::new(Duration::from_millis(50));
        feed.inject_frame(r#"{"type":"snapshot","data":{"multiplier":"1.87x","running":true}}"#);
        let snap = feed.snapshot().await.expect("fresh snapshot");
        assert_eq!(snap.multiplier, 1.87);
        assert!(snap.is_round_running);

        tokio::time::sleep(Duration::from_millis(80)).await;
        assert!(matches!(feed.snapshot().await, Err(SourceError::ViewLost(_))));
    }

    #[tokio::test]
    async fn ack_resolves_pending_request() {
        let feed = PushFeed::new(Duration::from_secs(2));
        let (cmd_tx, mut cmd_rx) = mpsc::channel(8);
        *feed.link.lock().unwrap() = Some(AgentLink { id: 1, cmd_tx });

        let agent = {
            let feed = Arc::clone(&feed);
            tokio::spawn(async move {
                let sent = cmd_rx.recv().await.expect("command");
                let v: serde_json::Value = serde_json::from_str(&sent).unwrap();
                assert_eq!(v["cmd"], "cashout");
                let id = v["id"].as_u64().unwrap();
                feed.inject_frame(&format!(r#"{{"type":"ack","id":{id},"ok":true}}"#));
            })
        };

        let ack = feed.request(AgentCmd::Cashout { leg: 0 }).await.expect("ack");
        assert!(ack.ok);
        agent.await.unwrap();
        assert!(feed.pending.is_empty());
    }

    #[tokio::test]
    async fn request_without_agent_fails_fast() {
        let feed = PushFeed::new(Duration::from_secs(2));
        let err = feed.request(AgentCmd::Submit { leg: 1 }).await.unwrap_err();
        assert!(matches!(err, ActionError::Transport(_)));
        assert!(feed.pending.is_empty());
    }
}
