use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::config::LegSelectors;
use crate::error::ActionError;
use crate::platform::PlatformActions;
use crate::source::WebDriverClient;

/// Sets the stake input and fires the events frameworks listen for.
/// Returns false when the input is missing.
const SET_STAKE_SCRIPT: &str = r#"
const el = document.querySelector(arguments[0]);
if (!el) return false;
const setter = Object.getOwnPropertyDescriptor(HTMLInputElement.prototype, 'value').set;
setter.call(el, String(arguments[1]));
el.dispatchEvent(new Event('input', { bubbles: true }));
el.dispatchEvent(new Event('change', { bubbles: true }));
return true;
"#;

/// "missing", "disabled" or "clicked".
const CLICK_SCRIPT: &str = r#"
const el = document.querySelector(arguments[0]);
if (!el) return 'missing';
if (el.disabled || el.getAttribute('aria-disabled') === 'true') return 'disabled';
el.click();
return 'clicked';
"#;

const ENABLED_SCRIPT: &str = r#"
const el = document.querySelector(arguments[0]);
return !!el && !el.disabled && el.getAttribute('aria-disabled') !== 'true' && el.offsetParent !== null;
"#;

/// Bet and cash-out controls clicked through the same WebDriver session that
/// reads the telemetry.
pub struct WebDriverActions {
    client: Arc<WebDriverClient>,
    legs: [LegSelectors; 2],
}

impl WebDriverActions {
    pub fn new(client: Arc<WebDriverClient>, legs: [LegSelectors; 2]) -> Self {
        Self { client, legs }
    }

    fn leg(&self, leg: usize) -> Result<&LegSelectors, ActionError> {
        self.legs
            .get(leg)
            .ok_or_else(|| ActionError::Unavailable(format!("no selectors for leg {leg}")))
    }

    async fn click(&self, selector: &str) -> Result<(), ActionError> {
        let value = self.client.execute(CLICK_SCRIPT, json!([selector])).await?;
        match value.as_str() {
            Some("clicked") => Ok(()),
            Some("disabled") => Err(ActionError::Rejected(format!("{selector} is disabled"))),
            _ => Err(ActionError::Unavailable(format!("{selector} not found"))),
        }
    }

    async fn enabled(&self, selector: &str) -> bool {
        match self.client.execute(ENABLED_SCRIPT, json!([selector])).await {
            Ok(v) => v.as_bool().unwrap_or(false),
            Err(e) => {
                debug!(%selector, "[WEBDRIVER] enabled check failed: {e}");
                false
            }
        }
    }
}

#[async_trait]
impl PlatformActions for WebDriverActions {
    async fn set_stake(&self, leg: usize, amount: f64) -> Result<(), ActionError> {
        let sel = &self.leg(leg)?.stake_input;
        let value = self
            .client
            .execute(SET_STAKE_SCRIPT, json!([sel, format!("{amount:.2}")]))
            .await?;
        if value == Value::Bool(true) {
            Ok(())
        } else {
            warn!(leg, %sel, "[WEBDRIVER] stake input not found");
            Err(ActionError::Unavailable(format!("{sel} not found")))
        }
    }

    async fn submit(&self, leg: usize) -> Result<(), ActionError> {
        let sel = self.leg(leg)?.submit_button.clone();
        self.click(&sel).await
    }

    async fn cashout(&self, leg: usize) -> Result<(), ActionError> {
        let sel = self.leg(leg)?.cashout_button.clone();
        self.click(&sel).await
    }

    async fn can_bet(&self, leg: usize) -> bool {
        match self.leg(leg) {
            Ok(sel) => self.enabled(&sel.submit_button).await,
            Err(_) => false,
        }
    }

    async fn can_cashout(&self, leg: usize) -> bool {
        match self.leg(leg) {
            Ok(sel) => self.enabled(&sel.cashout_button).await,
            Err(_) => false,
        }
    }
}
