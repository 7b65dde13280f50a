//! Storage seam for the grading workflow.
//!
//! The grading code only talks to these traits. `PgSubmissionStore` backs them with
//! Postgres; `MemoryStore` keeps everything in process.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::{
    error::AppError,
    models::{
        experiment::Experiment,
        question::Question,
        submission::{ExperimentSubmission, QuestionSubmission},
    },
};

#[async_trait]
pub trait SubmissionStore: Send + Sync {
    /// Reads an experiment outside of any transaction.
    async fn find_experiment(&self, id: Uuid) -> Result<Option<Experiment>, AppError>;

    /// Starts a unit of work. Dropping the returned transaction without
    /// calling `commit` discards everything written through it.
    async fn begin(&self) -> Result<Box<dyn StoreTx>, AppError>;
}

/// Reads and writes inside one all-or-nothing transaction.
#[async_trait]
pub trait StoreTx: Send {
    async fn find_experiment(&mut self, id: Uuid) -> Result<Option<Experiment>, AppError>;

    /// All questions of an experiment, in teacher-defined order.
    async fn experiment_questions(&mut self, experiment_id: Uuid) -> Result<Vec<Question>, AppError>;

    /// Most recent attempt for the pair whose status is not `submitted`.
    async fn find_open_attempt(
        &mut self,
        experiment_id: Uuid,
        student_id: i64,
    ) -> Result<Option<ExperimentSubmission>, AppError>;

    /// Inserts a new in-progress attempt. Returns `false` without writing when the
    /// pair already has an open attempt.
    async fn insert_attempt(&mut self, attempt: &ExperimentSubmission) -> Result<bool, AppError>;

    /// Bumps `updated_at` of an attempt that is still in progress and holds it for the rest
    /// of the transaction. Returns `false` when the attempt has been submitted meanwhile.
    async fn touch_attempt(&mut self, id: Uuid, now: DateTime<Utc>) -> Result<bool, AppError>;

    /// Marks an in-progress attempt submitted with its final score. `now` becomes
    /// `submitted_at`. An attempt that is already submitted is a `Conflict`.
    async fn finish_attempt(
        &mut self,
        id: Uuid,
        total_score: i32,
        now: DateTime<Utc>,
    ) -> Result<(), AppError>;

    async fn find_answer(
        &mut self,
        submission_id: Uuid,
        question_id: Uuid,
    ) -> Result<Option<QuestionSubmission>, AppError>;

    async fn insert_answer(&mut self, row: &QuestionSubmission) -> Result<(), AppError>;

    async fn update_answer(&mut self, row: &QuestionSubmission) -> Result<(), AppError>;

    async fn list_answers(&mut self, submission_id: Uuid) -> Result<Vec<QuestionSubmission>, AppError>;

    async fn commit(self: Box<Self>) -> Result<(), AppError>;
}

/// How often `current_attempt` re-reads after losing a race with another request.
const ATTEMPT_RETRIES: usize = 3;

/// Returns the open attempt for (experiment, student), creating one if there is none.
/// Exactly one attempt row is created or touched, and it stays locked until `tx` ends,
/// so a concurrent finalize cannot close it underneath the caller.
pub async fn current_attempt(
    tx: &mut dyn StoreTx,
    experiment_id: Uuid,
    student_id: i64,
    now: DateTime<Utc>,
) -> Result<ExperimentSubmission, AppError> {
    for _ in 0..ATTEMPT_RETRIES {
        if let Some(mut attempt) = tx.find_open_attempt(experiment_id, student_id).await? {
            if tx.touch_attempt(attempt.id, now).await? {
                attempt.updated_at = now;
                return Ok(attempt);
            }
            // Submitted by another request between the read and the lock.
            tracing::debug!("Attempt {} closed concurrently, opening a new one", attempt.id);
            continue;
        }

        let attempt = ExperimentSubmission::new_attempt(experiment_id, student_id, now);
        if tx.insert_attempt(&attempt).await? {
            tracing::info!(
                "Opened attempt {} for experiment {} student {}",
                attempt.id,
                experiment_id,
                student_id
            );
            return Ok(attempt);
        }
        // A concurrent request opened the attempt first; the next read picks it up.
    }

    Err(AppError::Conflict(format!(
        "Could not open an attempt for experiment {} student {}, please retry",
        experiment_id, student_id
    )))
}
