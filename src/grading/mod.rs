//! Student submission workflow: attempts, answer reconciliation, scoring and finalization.

pub mod finalizer;
pub mod judge;
pub mod memory;
pub mod postgres;
pub mod reconciler;
pub mod scoring;
pub mod store;

pub use finalizer::{DraftState, FinalizedSubmission, Grader};
pub use judge::{HttpJudge, Judge, JudgeError, StaticJudge};
pub use memory::MemoryStore;
pub use postgres::PgSubmissionStore;
pub use store::{StoreTx, SubmissionStore};
