//! Ports - 抽象化レイヤー
//!
//! 実行エンジン（app）が外部に触れる境界をすべて trait として定義します。
//!
//! - EffectStore: run の正本（request / result / breakpoint / journal / output）
//! - Delegate: タスクを実際に実行する担い手
//! - ReviewerChannel: breakpoint を人や方針に届ける経路
//! - Clock / IdGenerator: 時刻と RunId

pub mod clock;
pub mod delegate;
pub mod effect_store;
pub mod id_generator;
pub mod reviewer;

pub use self::clock::{Clock, FixedClock, SystemClock};
pub use self::delegate::{Delegate, DelegateReply, DelegateRequest};
pub use self::effect_store::{EffectStore, RequestRecord};
pub use self::id_generator::{IdGenerator, UlidGenerator};
pub use self::reviewer::ReviewerChannel;
