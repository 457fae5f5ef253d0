use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::source::parse::RawSnapshot;

static PARSE_FAILURES: AtomicU64 = AtomicU64::new(0);

/// Frames pushed by the in-page capture agent.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentFrame {
    /// Sent once after the agent attaches to the game view.
    Hello {
        #[serde(default)]
        agent: Option<String>,
        #[serde(default)]
        platform: Option<String>,
    },
    Snapshot { data: RawSnapshot },
    /// Failure banner text if one is on screen, else the page's visible text.
    PageText { text: String },
    /// Answer to an `AgentCommand` with the same id.
    Ack {
        id: u64,
        ok: bool,
        #[serde(default)]
        error: Option<String>,
    },
}

/// Command sent to the agent. `id` correlates the agent's `ack`.
#[derive(Debug, Serialize)]
pub struct AgentCommand {
    pub id: u64,
    #[serde(flatten)]
    pub cmd: AgentCmd,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "cmd", rename_all = "snake_case")]
pub enum AgentCmd {
    Reload,
    SetStake { leg: usize, amount: f64 },
    Submit { leg: usize },
    Cashout { leg: usize },
    CanBet { leg: usize },
    CanCashout { leg: usize },
}

/// Parse one WebSocket text frame from the agent.
///
/// Agents batch frames as a JSON array when the page is busy; a single object
/// is the common case.
pub fn parse_agent_frame(raw: &str) -> Vec<AgentFrame> {
    let frames: Vec<AgentFrame> = if raw.trim_start().starts_with('[') {
        serde_json::from_str(raw).unwrap_or_default()
    } else {
        match serde_json::from_str::<AgentFrame>(raw) {
            Ok(f) => vec![f],
            Err(_) => vec![],
        }
    };

    if frames.is_empty() {
        let count = PARSE_FAILURES.fetch_add(1, Ordering::Relaxed) + 1;
        if count <= 10 || count % 1000 == 0 {
            let sample: String = raw.chars().take(300).collect();
            warn!(count, "[PUSH] unrecognized agent frame: {sample}");
        }
    }
    frames
}

pub fn encode_command(id: u64, cmd: AgentCmd) -> String {
    serde_json::to_string(&AgentCommand { id, cmd }).unwrap_or_default()
}
