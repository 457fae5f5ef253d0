//! Turning rendered field text into numbers.
//!
//! Pages render amounts with local conventions ("1.234,50 €", "$1,234.50",
//! "3,42x"), so the separators are resolved per value rather than by locale.

use std::time::Instant;

use serde::Deserialize;

use crate::types::GameSnapshot;

/// A field as it comes off the page: usually text, sometimes already a number.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum RawField {
    Number(f64),
    Text(String),
}

impl RawField {
    fn amount(&self) -> Option<f64> {
        match self {
            RawField::Number(n) if n.is_finite() => Some(*n),
            RawField::Number(_) => None,
            RawField::Text(s) => parse_amount(s),
        }
    }

    fn multiplier(&self) -> Option<f64> {
        match self {
            RawField::Number(n) if n.is_finite() => Some(*n),
            RawField::Number(_) => None,
            RawField::Text(s) => parse_multiplier(s),
        }
    }

    fn count(&self) -> Option<u32> {
        match self {
            RawField::Number(n) if n.is_finite() && *n >= 0.0 => Some(*n as u32),
            RawField::Number(_) => None,
            RawField::Text(s) => parse_count(s),
        }
    }
}

/// Visible fields as read by a capture script, before parsing.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RawSnapshot {
    pub multiplier: Option<RawField>,
    pub running: bool,
    pub history: Vec<RawField>,
    pub bet_count: Option<RawField>,
    pub total_staked: Option<RawField>,
    pub total_paid: Option<RawField>,
    pub countdown: bool,
}

impl RawSnapshot {
    /// Unreadable numbers degrade to 0; unreadable history items are dropped.
    pub fn into_snapshot(self, captured_at_ns: u64, captured_at: Instant) -> GameSnapshot {
        GameSnapshot {
            multiplier: self.multiplier.and_then(|f| f.multiplier()).unwrap_or(0.0).max(0.0),
            is_round_running: self.running,
            history: self.history.iter().filter_map(RawField::multiplier).collect(),
            bet_count: self.bet_count.and_then(|f| f.count()).unwrap_or(0),
            total_staked: self.total_staked.and_then(|f| f.amount()).unwrap_or(0.0),
            total_paid: self.total_paid.and_then(|f| f.amount()).unwrap_or(0.0),
            is_countdown_visible: self.countdown,
            captured_at_ns,
            captured_at,
        }
    }
}

/// "3.42x", "x1,00", "1 234.5×" → value.
pub fn parse_multiplier(s: &str) -> Option<f64> {
    let trimmed = s.trim().trim_matches(|c: char| c == 'x' || c == 'X' || c == '×').trim();
    parse_amount(trimmed)
}

/// Money text with currency symbols and either separator convention.
pub fn parse_amount(s: &str) -> Option<f64> {
    let cleaned: String = s
        .chars()
        .filter(|c| c.is_ascii_digit() || matches!(c, '.' | ',' | '-'))
        .collect();
    if !cleaned.chars().any(|c| c.is_ascii_digit()) {
        return None;
    }

    let normalized = match (cleaned.rfind('.'), cleaned.rfind(',')) {
        // Whichever separator comes last is the decimal one.
        (Some(dot), Some(comma)) if dot > comma => cleaned.replace(',', ""),
        (Some(_), Some(_)) => cleaned.replace('.', "").replace(',', "."),
        (None, Some(comma)) => {
            let decimals = cleaned.len() - comma - 1;
            if cleaned.matches(',').count() == 1 && decimals <= 2 {
                cleaned.replace(',', ".")
            } else {
                cleaned.replace(',', "")
            }
        }
        (Some(_), None) if cleaned.matches('.').count() > 1 => cleaned.replace('.', ""),
        _ => cleaned,
    };
    normalized.parse::<f64>().ok().filter(|v| v.is_finite())
}

/// Integer counts; any grouping characters are ignored.
pub fn parse_count(s: &str) -> Option<u32> {
    let digits: String = s.chars().filter(|c| c.is_ascii_digit()).collect();
    if digits.is_empty() {
        return None;
    }
    digits.parse::<u32>().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn multiplier_text_variants() {
        assert_eq!(parse_multiplier("3.42x"), Some(3.42));
        assert_eq!(parse_multiplier("x1,00"), Some(1.0));
        assert_eq!(parse_multiplier(" 12.07× "), Some(12.07));
        assert_eq!(parse_multiplier("1,234.50x"), Some(1234.5));
        assert_eq!(parse_multiplier("--"), None);
        assert_eq!(parse_multiplier(""), None);
    }

    #[test]
    fn amount_separator_conventions() {
        assert_eq!(parse_amount("$1,234.50"), Some(1234.5));
        assert_eq!(parse_amount("1.234,50 €"), Some(1234.5));
        assert_eq!(parse_amount("1,234,567"), Some(1_234_567.0));
        assert_eq!(parse_amount("1.234.567"), Some(1_234_567.0));
        assert_eq!(parse_amount("S/ 25,5"), Some(25.5));
        assert_eq!(parse_amount("250"), Some(250.0));
    }

    #[test]
    fn counts_ignore_grouping() {
        assert_eq!(parse_count("1.204 bets"), Some(1204));
        assert_eq!(parse_count("37"), Some(37));
        assert_eq!(parse_count("none"), None);
    }

    #[test]
    fn raw_snapshot_degrades_unreadable_fields() {
        let raw: RawSnapshot = serde_json::from_str(
            r#"{"multiplier":"--","running":true,"history":["2.10x","?","1.00x"],
                "bet_count":42,"total_staked":"1.250,00","total_paid":null,"countdown":false}"#,
        )
        .unwrap();
        let snap = raw.into_snapshot(7, Instant::now());
        assert_eq!(snap.multiplier, 0.0);
        assert!(snap.is_round_running);
        assert_eq!(snap.history, vec![2.10, 1.00]);
        assert_eq!(snap.bet_count, 42);
        assert_eq!(snap.total_staked, 1250.0);
        assert_eq!(snap.total_paid, 0.0);
        assert_eq!(snap.captured_at_ns, 7);
    }
}
