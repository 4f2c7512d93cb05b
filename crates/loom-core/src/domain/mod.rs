//! Domain model (IDs, descriptors, shapes, results, gates, journal, ...).
//!
//! ここにある型は I/O を持ちません。永続化は ports/impls、実行は app の担当です。

pub mod attempt;
pub mod breakpoint;
pub mod decision;
pub mod descriptor;
pub mod envelope;
pub mod errors;
pub mod events;
pub mod ids;
pub mod outcome;
pub mod shape;
pub mod spec;

pub use attempt::{AttemptOutcome, AttemptRecord, FailureRecord};
pub use breakpoint::{
    Breakpoint, BreakpointContext, BreakpointRecord, BreakpointSpec, FileRef, GateState,
};
pub use decision::{Decision, Verdict};
pub use descriptor::{
    DelegateName, DelegateRef, TaskContext, TaskDescriptor, TaskDescriptorBuilder, TaskFactory,
    TaskIo, TaskKind,
};
pub use envelope::{ResultEnvelope, RunMetadata, RunRecord};
pub use errors::{
    DelegateError, DelegateFailure, DelegateFailureKind, ErrorKind, LoomError, StoreError,
};
pub use events::{JournalEntry, JournalEvent};
pub use ids::{BreakpointId, EffectId, Id, IdMarker, ParseIdError, Run, RunId};
pub use outcome::{Artifact, TaskResult};
pub use shape::{FieldShape, ObjectShape, Shape, ValidationError, Violation, validate};
pub use spec::ProcessOptions;
