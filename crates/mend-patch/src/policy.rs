//! Lexical policy gate
//!
//! A blunt case-insensitive substring filter. It is applied to improvement
//! queries before they are published and to generated diffs before they are
//! applied. It does not understand code; it only keeps obviously out-of-scope
//! text away from the approval step and the sandbox.

use mend_core::config::PolicyConfig;
use mend_core::{MendError, Result};
use tracing::info;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PolicyDecision {
    Accept,
    Reject(String),
}

impl PolicyDecision {
    pub fn is_accept(&self) -> bool {
        matches!(self, Self::Accept)
    }

    /// `Reject` becomes `MendError::PolicyViolation`
    pub fn into_result(self) -> Result<()> {
        match self {
            Self::Accept => Ok(()),
            Self::Reject(reason) => Err(MendError::PolicyViolation(reason)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct PolicyGate {
    denylist: Vec<String>,
    network_keywords: Vec<String>,
    network_phase_threshold: usize,
}

impl PolicyGate {
    pub fn new(
        denylist: impl IntoIterator<Item = impl Into<String>>,
        network_keywords: impl IntoIterator<Item = impl Into<String>>,
        network_phase_threshold: usize,
    ) -> Self {
        let lower = |s: String| s.to_lowercase();
        Self {
            denylist: denylist.into_iter().map(Into::into).map(lower).collect(),
            network_keywords: network_keywords.into_iter().map(Into::into).map(lower).collect(),
            network_phase_threshold,
        }
    }

    pub fn from_config(config: &PolicyConfig) -> Self {
        Self::new(
            config.denylist.iter().cloned(),
            config.network_keywords.iter().cloned(),
            config.network_phase_threshold,
        )
    }

    /// Check `text` for the zero-based `phase`
    pub fn check(&self, text: &str, phase: usize) -> PolicyDecision {
        let haystack = text.to_lowercase();

        if let Some(token) = self.denylist.iter().find(|t| haystack.contains(t.as_str())) {
            info!("Policy gate rejected text containing '{}'", token);
            return PolicyDecision::Reject(format!("contains denied token '{}'", token));
        }

        if phase < self.network_phase_threshold {
            if let Some(token) = self
                .network_keywords
                .iter()
                .find(|t| haystack.contains(t.as_str()))
            {
                info!("Policy gate rejected network use '{}' in phase {}", token, phase);
                return PolicyDecision::Reject(format!(
                    "network capability '{}' is not allowed before phase {}",
                    token, self.network_phase_threshold
                ));
            }
        }

        PolicyDecision::Accept
    }
}

impl Default for PolicyGate {
    fn default() -> Self {
        Self::from_config(&PolicyConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_denylist_is_case_insensitive() {
        let gate = PolicyGate::default();
        assert!(gate.check("+    # quick HACK for speed", 4).into_result().is_err());
        assert!(matches!(
            gate.check("Patch to DELETE old entries", 0),
            PolicyDecision::Reject(_)
        ));
        assert!(gate.check("+    numbers.sort()", 0).is_accept());
    }

    #[test]
    fn test_network_phase_gating() {
        let gate = PolicyGate::default();
        let diff = "+import requests\n+    return requests.get(url).text";

        assert!(!gate.check(diff, 0).is_accept());
        assert!(!gate.check(diff, 3).is_accept());
        assert!(gate.check(diff, 4).is_accept());
        assert!(gate.check(diff, 5).is_accept());
    }

    #[test]
    fn test_custom_rules() {
        let gate = PolicyGate::new(["Eval"], ["socket"], 1);
        assert!(!gate.check("result = eval(x)", 3).is_accept());
        assert!(!gate.check("import socket", 0).is_accept());
        assert!(gate.check("import socket", 1).is_accept());
    }
}
