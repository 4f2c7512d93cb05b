//! Domain identifiers (strongly-typed IDs).
//!
//! # Run ID: ULID + Phantom type
//! Run は ULID (Universally Unique Lexicographically Sortable Identifier) で識別します。
//! `Id<T>` の `T` は実行時には使わないマーカー型で、コンパイル時の型安全性だけを提供します。
//!
//! # Effect / Breakpoint ID: run 内の連番
//! EffectId と BreakpointId は run の中でだけ意味を持つ安定キーです。
//! replay のたびに同じ値になる必要があるため、乱数や時刻は使わず、
//! 呼び出し順の連番から作ります（`t0001`, `b0001`）。

use serde::{Deserialize, Serialize};
use std::fmt;
use std::marker::PhantomData;
use std::str::FromStr;
use ulid::Ulid;

/// IdMarker は各 ID 型のマーカー trait
///
/// Display で使うプレフィックス（"run-"）を提供します。
pub trait IdMarker: Send + Sync + 'static {
    fn prefix() -> &'static str;
}

/// ジェネリック ID 型
#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Id<T: IdMarker> {
    ulid: Ulid,
    #[serde(skip)]
    _marker: PhantomData<T>,
}

impl<T: IdMarker> Id<T> {
    pub fn from_ulid(ulid: Ulid) -> Self {
        Self {
            ulid,
            _marker: PhantomData,
        }
    }

    pub fn as_ulid(&self) -> Ulid {
        self.ulid
    }
}

impl<T: IdMarker> From<Ulid> for Id<T> {
    fn from(ulid: Ulid) -> Self {
        Self::from_ulid(ulid)
    }
}

impl<T: IdMarker> fmt::Display for Id<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", T::prefix(), self.ulid)
    }
}

/// Error returned when parsing a prefixed id from text (CLI, file names).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid id `{0}`")]
pub struct ParseIdError(pub String);

impl<T: IdMarker> FromStr for Id<T> {
    type Err = ParseIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let raw = s.strip_prefix(T::prefix()).unwrap_or(s);
        Ulid::from_string(raw)
            .map(Self::from_ulid)
            .map_err(|_| ParseIdError(s.to_string()))
    }
}

/// Run のマーカー型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Run {}

impl IdMarker for Run {
    fn prefix() -> &'static str {
        "run-"
    }
}

/// Identifier of one process run (the unit of resume / audit / result).
pub type RunId = Id<Run>;

/// Stable key of one task invocation inside a run.
///
/// Used as the directory name for `tasks/<effect_id>/`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EffectId(String);

impl EffectId {
    /// The `seq`-th task invocation of a run (1-indexed).
    pub fn task(seq: u64) -> Self {
        Self::scoped("", seq)
    }

    /// Id of the `seq`-th task inside a parallel branch (`g0001.2.t0001`).
    pub fn scoped(prefix: &str, seq: u64) -> Self {
        Self(format!("{prefix}t{seq:04}"))
    }

    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EffectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Key of one breakpoint raised inside a run.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BreakpointId(String);

impl BreakpointId {
    /// The `seq`-th breakpoint of a run (1-indexed).
    pub fn gate(seq: u64) -> Self {
        Self::scoped("", seq)
    }

    pub fn scoped(prefix: &str, seq: u64) -> Self {
        Self(format!("{prefix}b{seq:04}"))
    }

    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for BreakpointId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_id_display_has_prefix() {
        let ulid = Ulid::new();
        let run = RunId::from_ulid(ulid);
        assert_eq!(run.as_ulid(), ulid);
        assert!(run.to_string().starts_with("run-"));
    }

    #[test]
    fn run_id_parses_with_or_without_prefix() {
        let run = RunId::from_ulid(Ulid::new());
        let text = run.to_string();
        assert_eq!(text.parse::<RunId>().unwrap(), run);
        assert_eq!(run.as_ulid().to_string().parse::<RunId>().unwrap(), run);
        assert!("run-nope".parse::<RunId>().is_err());
    }

    #[test]
    fn run_id_serializes_as_bare_ulid() {
        let run = RunId::from_ulid(Ulid::new());
        let s = serde_json::to_string(&run).unwrap();
        let back: RunId = serde_json::from_str(&s).unwrap();
        assert_eq!(run, back);
        assert_eq!(s, format!("\"{}\"", run.as_ulid()));
    }

    #[test]
    fn sequential_ids_are_zero_padded() {
        assert_eq!(EffectId::task(3).as_str(), "t0003");
        assert_eq!(BreakpointId::gate(12).as_str(), "b0012");
        // 辞書順 = 発行順
        assert!(EffectId::task(9) < EffectId::task(10));
        assert_eq!(EffectId::scoped("g0001.2.", 1).as_str(), "g0001.2.t0001");
    }
}
