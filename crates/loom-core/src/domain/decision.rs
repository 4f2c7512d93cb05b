//! Gate decisions: what a reviewer answered for a breakpoint.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::errors::LoomError;
use super::ids::BreakpointId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Approved,
    Rejected,
}

/// The value a reviewer records for a breakpoint.
///
/// `revision` lets an approving reviewer hand corrected data back to the
/// process (e.g. an edited scope or a waived finding list).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Decision {
    pub verdict: Verdict,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revision: Option<Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reviewer: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

impl Decision {
    pub fn approve() -> Self {
        Self {
            verdict: Verdict::Approved,
            revision: None,
            reviewer: None,
            note: None,
        }
    }

    pub fn reject(note: impl Into<String>) -> Self {
        Self {
            verdict: Verdict::Rejected,
            revision: None,
            reviewer: None,
            note: Some(note.into()),
        }
    }

    pub fn with_revision(mut self, revision: Value) -> Self {
        self.revision = Some(revision);
        self
    }

    pub fn by(mut self, reviewer: impl Into<String>) -> Self {
        self.reviewer = Some(reviewer.into());
        self
    }

    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.note = Some(note.into());
        self
    }

    pub fn is_approved(&self) -> bool {
        self.verdict == Verdict::Approved
    }

    /// Turn a rejection into [`LoomError::GateRejected`].
    ///
    /// For processes that make a gate blocking; the gate manager itself has no
    /// opinion on what a rejection means.
    pub fn require_approval(self, breakpoint_id: &BreakpointId) -> Result<Self, LoomError> {
        match self.verdict {
            Verdict::Approved => Ok(self),
            Verdict::Rejected => Err(LoomError::GateRejected {
                breakpoint_id: breakpoint_id.clone(),
                note: self.note,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn verdict_serializes_snake_case() {
        let s = serde_json::to_string(&Verdict::Approved).unwrap();
        assert_eq!(s, "\"approved\"");
    }

    #[test]
    fn decision_roundtrip_keeps_revision() {
        let d = Decision::approve()
            .with_revision(json!({"scope": ["Vault.sol"]}))
            .by("alice");
        let back: Decision = serde_json::from_str(&serde_json::to_string(&d).unwrap()).unwrap();
        assert_eq!(back, d);
        assert!(back.is_approved());
    }

    #[test]
    fn require_approval_maps_rejection_to_error() {
        let id = BreakpointId::gate(1);
        assert!(Decision::approve().require_approval(&id).is_ok());

        let err = Decision::reject("too risky")
            .require_approval(&id)
            .unwrap_err();
        assert!(matches!(
            err,
            LoomError::GateRejected { ref note, .. } if note.as_deref() == Some("too risky")
        ));
    }
}
