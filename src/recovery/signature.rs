/// Case-insensitive substring match against the profile's failure phrases.
#[derive(Debug, Clone, Default)]
pub struct SignatureMatcher {
    needles: Vec<String>,
}

impl SignatureMatcher {
    pub fn new<I, S>(signatures: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let needles = signatures
            .into_iter()
            .map(|s| s.as_ref().trim().to_lowercase())
            .filter(|s| !s.is_empty())
            .collect();
        Self { needles }
    }

    /// First signature found in `text`, if any.
    pub fn find(&self, text: &str) -> Option<&str> {
        let haystack = text.to_lowercase();
        self.needles
            .iter()
            .find(|n| haystack.contains(n.as_str()))
            .map(String::as_str)
    }

    pub fn matches(&self, text: &str) -> bool {
        self.find(text).is_some()
    }

    /// The matcher as a plain predicate for the engine.
    pub fn into_predicate(self) -> impl Fn(&str) -> bool + Send + Sync + 'static {
        move |text: &str| self.matches(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matches_ignoring_case() {
        let m = SignatureMatcher::new(["Session Expired", "no autorizado"]);
        assert!(m.matches("Error: SESSION EXPIRED, please reload"));
        assert_eq!(m.find("Acceso NO AUTORIZADO"), Some("no autorizado"));
        assert!(!m.matches("Round 1.87x"));
    }

    #[test]
    fn blank_signatures_never_match() {
        let m = SignatureMatcher::new(["", "   "]);
        assert!(!m.matches("anything"));
        let pred = SignatureMatcher::new(["login"]).into_predicate();
        assert!(pred("please LOGIN again"));
    }
}
