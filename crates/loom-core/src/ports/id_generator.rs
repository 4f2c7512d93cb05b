//! IdGenerator port - RunId 生成の抽象化
//!
//! EffectId / BreakpointId は run 内のカウンタから決まるので、ここで生成する
//! のは RunId だけです。

use crate::domain::ids::RunId;
use crate::ports::Clock;
use ulid::Ulid;

pub trait IdGenerator: Send + Sync {
    fn generate_run_id(&self) -> RunId;
}

/// UlidGenerator は ULID ベースの ID 生成器
///
/// Clock から timestamp 部分を取るので、FixedClock を渡せば timestamp は
/// 決定的になります（ランダム部分は毎回異なる）。
pub struct UlidGenerator<C> {
    clock: C,
}

impl<C: Clock> UlidGenerator<C> {
    pub fn new(clock: C) -> Self {
        Self { clock }
    }
}

impl<C: Clock> IdGenerator for UlidGenerator<C> {
    fn generate_run_id(&self) -> RunId {
        let timestamp_ms = self.clock.now().timestamp_millis() as u64;
        RunId::from(Ulid::from_parts(timestamp_ms, rand::random()))
    }
}
