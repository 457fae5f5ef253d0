use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::{Method, StatusCode};
use serde_json::{json, Value};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::config::{SnapshotSelectors, SOURCE_TIMEOUT_MS};
use crate::error::SourceError;
use crate::source::parse::RawSnapshot;
use crate::source::TelemetrySource;
use crate::types::{now_ns, GameSnapshot, ViewHandle};

/// W3C web element reference key.
const ELEMENT_KEY: &str = "element-6066-11e4-a52f-4abd4138edd2";

/// Session creation launches a browser; it gets far more time than a read.
const NEW_SESSION_TIMEOUT_SECS: u64 = 60;

/// Reads every field in one round trip. Each selector list is tried in order
/// and the first match wins. Returns null when neither the multiplier nor the
/// countdown can be found, which means the view is gone.
const SNAPSHOT_SCRIPT: &str = r#"
const sel = arguments[0];
const first = (list) => { for (const s of list) { const el = document.querySelector(s); if (el) return el; } return null; };
const all = (list) => { for (const s of list) { const els = document.querySelectorAll(s); if (els.length) return Array.from(els); } return []; };
const visible = (el) => !!el && el.offsetParent !== null && getComputedStyle(el).visibility !== 'hidden';
const text = (el) => el ? (el.innerText || el.textContent || '').trim() : null;
const mult = first(sel.multiplier);
const countdown = first(sel.countdown);
if (!mult && !countdown) return null;
return {
  multiplier: text(mult),
  running: !!first(sel.running),
  history: all(sel.history).map(text),
  bet_count: text(first(sel.bet_count)),
  total_staked: text(first(sel.total_staked)),
  total_paid: text(first(sel.total_paid)),
  countdown: visible(countdown),
};
"#;

/// Banner text if a failure element exists in the frame or the top page,
/// else the visible text of both.
const PAGE_TEXT_SCRIPT: &str = r#"
const banners = arguments[0];
const docs = [document];
try { if (window.top && window.top.document !== document) docs.push(window.top.document); } catch (e) {}
for (const d of docs) {
  for (const s of banners) {
    const el = d.querySelector(s);
    if (el && (el.innerText || '').trim()) return el.innerText.trim();
  }
}
return docs.map((d) => (d.body ? d.body.innerText : '')).join('\n');
"#;

/// Thin W3C WebDriver client over the session that shows the game.
pub struct WebDriverClient {
    http: reqwest::Client,
    base: String,
    session: RwLock<String>,
    game_url: Option<String>,
}

impl WebDriverClient {
    /// Attach to `session` if given, otherwise start a new one, then open the game.
    pub async fn connect(
        base: &str,
        session: Option<String>,
        game_url: Option<String>,
    ) -> Result<Self, SourceError> {
        let http = reqwest::Client::builder().build()?;
        let base = base.trim_end_matches('/').to_string();
        let session_id = match session {
            Some(id) => {
                info!(session = %id, "[WEBDRIVER] attaching to existing session");
                id
            }
            None => new_session(&http, &base).await?,
        };
        let client = Self { http, base, session: RwLock::new(session_id), game_url };
        if let Some(url) = client.game_url.clone() {
            client.navigate(&url).await?;
        }
        Ok(client)
    }

    /// Replace a dead session with a fresh one on the game page.
    pub async fn renew_session(&self) -> Result<(), SourceError> {
        let id = new_session(&self.http, &self.base).await?;
        *self.session.write().await = id;
        if let Some(url) = &self.game_url {
            self.navigate(url).await?;
        }
        Ok(())
    }

    async fn navigate(&self, url: &str) -> Result<(), SourceError> {
        self.call(Method::POST, "/url", Some(json!({ "url": url }))).await?;
        info!(%url, "[WEBDRIVER] navigated");
        Ok(())
    }

    /// Raw session call: HTTP status plus the protocol `value` member.
    pub async fn call_raw(
        &self,
        method: Method,
        path: &str,
        body: Option<Value>,
    ) -> Result<(StatusCode, Value), SourceError> {
        let url = {
            let session = self.session.read().await;
            format!("{}/session/{}{}", self.base, session, path)
        };
        let mut req = self
            .http
            .request(method, &url)
            .timeout(Duration::from_millis(SOURCE_TIMEOUT_MS));
        if let Some(b) = body {
            req = req.json(&b);
        }
        let resp = req.send().await.map_err(|e| {
            if e.is_timeout() {
                SourceError::Timeout(SOURCE_TIMEOUT_MS)
            } else {
                SourceError::Transport(e.to_string())
            }
        })?;
        let status = resp.status();
        let payload: Value = resp.json().await?;
        Ok((status, payload.get("value").cloned().unwrap_or(Value::Null)))
    }

    pub async fn call(&self, method: Method, path: &str, body: Option<Value>) -> Result<Value, SourceError> {
        let (status, value) = self.call_raw(method, path, body).await?;
        if status.is_success() {
            Ok(value)
        } else {
            Err(classify_error(&value))
        }
    }

    pub async fn execute(&self, script: &str, args: Value) -> Result<Value, SourceError> {
        self.call(Method::POST, "/execute/sync", Some(json!({ "script": script, "args": args })))
            .await
    }

    /// Element id for the first match of `selector`, or `None`.
    pub async fn find(&self, selector: &str) -> Result<Option<String>, SourceError> {
        let (status, value) = self
            .call_raw(
                Method::POST,
                "/element",
                Some(json!({ "using": "css selector", "value": selector })),
            )
            .await?;
        if !status.is_success() {
            return match error_code(&value) {
                Some("no such element") => Ok(None),
                _ => Err(classify_error(&value)),
            };
        }
        Ok(value.get(ELEMENT_KEY).and_then(Value::as_str).map(str::to_string))
    }

    pub async fn switch_to_top(&self) -> Result<(), SourceError> {
        self.call(Method::POST, "/frame", Some(json!({ "id": Value::Null }))).await?;
        Ok(())
    }

    pub async fn switch_to_frame(&self, element_id: &str) -> Result<(), SourceError> {
        let mut reference = serde_json::Map::new();
        reference.insert(ELEMENT_KEY.to_string(), Value::String(element_id.to_string()));
        self.call(Method::POST, "/frame", Some(json!({ "id": Value::Object(reference) }))).await?;
        Ok(())
    }
}

async fn new_session(http: &reqwest::Client, base: &str) -> Result<String, SourceError> {
    let resp = http
        .post(format!("{base}/session"))
        .timeout(Duration::from_secs(NEW_SESSION_TIMEOUT_SECS))
        .json(&json!({ "capabilities": { "alwaysMatch": {} } }))
        .send()
        .await?;
    let payload: Value = resp.json().await?;
    let value = payload.get("value").cloned().unwrap_or(Value::Null);
    match value.get("sessionId").and_then(Value::as_str) {
        Some(id) => {
            info!(session = %id, "[WEBDRIVER] new session started");
            Ok(id.to_string())
        }
        None => Err(classify_error(&value)),
    }
}

fn error_code(value: &Value) -> Option<&str> {
    value.get("error").and_then(Value::as_str)
}

/// Map a W3C error payload onto the source error taxonomy.
fn classify_error(value: &Value) -> SourceError {
    let code = error_code(value).unwrap_or("unknown error");
    let message = value.get("message").and_then(Value::as_str).unwrap_or("");
    let short: String = message.chars().take(200).collect();
    match code {
        "no such window" | "no such frame" | "invalid session id" | "stale element reference"
        | "detached shadow root" => SourceError::ViewLost(format!("{code}: {short}")),
        "timeout" | "script timeout" => SourceError::Timeout(SOURCE_TIMEOUT_MS),
        "javascript error" => SourceError::Malformed(format!("{code}: {short}")),
        _ => SourceError::Transport(format!("{code}: {short}")),
    }
}

/// Direct-poll telemetry: reads the page through WebDriver on every call.
pub struct WebDriverSource {
    client: Arc<WebDriverClient>,
    selectors: SnapshotSelectors,
    view_selectors: Vec<String>,
}

impl WebDriverSource {
    pub fn new(client: Arc<WebDriverClient>, selectors: SnapshotSelectors, view_selectors: Vec<String>) -> Self {
        Self { client, selectors, view_selectors }
    }
}

#[async_trait]
impl TelemetrySource for WebDriverSource {
    async fn snapshot(&self) -> Result<GameSnapshot, SourceError> {
        let args = json!([serde_json::to_value(&self.selectors).map_err(|e| SourceError::Malformed(e.to_string()))?]);
        let value = self.client.execute(SNAPSHOT_SCRIPT, args).await?;
        let captured_at = Instant::now();
        if value.is_null() {
            return Err(SourceError::ViewLost("game fields not found".to_string()));
        }
        let raw: RawSnapshot =
            serde_json::from_value(value).map_err(|e| SourceError::Malformed(e.to_string()))?;
        Ok(raw.into_snapshot(now_ns(), captured_at))
    }

    async fn reacquire(&self) -> Result<ViewHandle, SourceError> {
        self.client.switch_to_top().await?;
        if self.view_selectors.is_empty() {
            return Ok(ViewHandle("document".to_string()));
        }
        for selector in &self.view_selectors {
            if let Some(element_id) = self.client.find(selector).await? {
                self.client.switch_to_frame(&element_id).await?;
                info!(%selector, "[WEBDRIVER] view acquired");
                return Ok(ViewHandle(selector.clone()));
            }
            debug!(%selector, "[WEBDRIVER] view selector did not match");
        }
        Err(SourceError::ViewLost("no view selector matched".to_string()))
    }

    async fn reload(&self) -> Result<(), SourceError> {
        let (status, value) = self.client.call_raw(Method::POST, "/refresh", Some(json!({}))).await?;
        if status.is_success() {
            return Ok(());
        }
        if error_code(&value) == Some("invalid session id") {
            warn!("[WEBDRIVER] session gone, starting a new one");
            return self.client.renew_session().await;
        }
        Err(classify_error(&value))
    }

    async fn page_text(&self) -> Result<String, SourceError> {
        let value = self
            .client
            .execute(PAGE_TEXT_SCRIPT, json!([self.selectors.failure_banner]))
            .await?;
        Ok(value.as_str().unwrap_or_default().to_string())
    }
}
