//! ReviewerChannel port - breakpoint を人（または方針）に届ける
//!
//! `offer` が `Some(decision)` を返せばその場で解決、`None` なら保留
//! （run は suspend し、後で `resolve` で再開）。

use async_trait::async_trait;

use crate::domain::breakpoint::BreakpointRecord;
use crate::domain::decision::Decision;

#[async_trait]
pub trait ReviewerChannel: Send + Sync {
    async fn offer(&self, record: &BreakpointRecord) -> Option<Decision>;
}
