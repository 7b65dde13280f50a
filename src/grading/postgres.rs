//! Postgres-backed `SubmissionStore`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

use crate::{
    error::AppError,
    grading::store::{StoreTx, SubmissionStore},
    models::{
        experiment::{EXPERIMENT_COLUMNS, Experiment},
        question::{QUESTION_COLUMNS, Question},
        submission::{
            ExperimentSubmission, QUESTION_SUBMISSION_COLUMNS, QuestionSubmission,
            SUBMISSION_COLUMNS, SubmissionStatus,
        },
    },
};

#[derive(Clone)]
pub struct PgSubmissionStore {
    pool: PgPool,
}

impl PgSubmissionStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SubmissionStore for PgSubmissionStore {
    async fn find_experiment(&self, id: Uuid) -> Result<Option<Experiment>, AppError> {
        let experiment = sqlx::query_as::<_, Experiment>(&format!(
            "SELECT {} FROM experiments WHERE id = $1",
            EXPERIMENT_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(experiment)
    }

    async fn begin(&self) -> Result<Box<dyn StoreTx>, AppError> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(PgStoreTx { tx }))
    }
}

struct PgStoreTx {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl StoreTx for PgStoreTx {
    async fn find_experiment(&mut self, id: Uuid) -> Result<Option<Experiment>, AppError> {
        let experiment = sqlx::query_as::<_, Experiment>(&format!(
            "SELECT {} FROM experiments WHERE id = $1",
            EXPERIMENT_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&mut *self.tx)
        .await?;
        Ok(experiment)
    }

    async fn experiment_questions(&mut self, experiment_id: Uuid) -> Result<Vec<Question>, AppError> {
        let questions = sqlx::query_as::<_, Question>(&format!(
            "SELECT {} FROM questions WHERE experiment_id = $1 ORDER BY position, created_at",
            QUESTION_COLUMNS
        ))
        .bind(experiment_id)
        .fetch_all(&mut *self.tx)
        .await?;
        Ok(questions)
    }

    async fn find_open_attempt(
        &mut self,
        experiment_id: Uuid,
        student_id: i64,
    ) -> Result<Option<ExperimentSubmission>, AppError> {
        let attempt = sqlx::query_as::<_, ExperimentSubmission>(&format!(
            "SELECT {} FROM experiment_submissions \
             WHERE experiment_id = $1 AND student_id = $2 AND status <> $3 \
             ORDER BY created_at DESC LIMIT 1",
            SUBMISSION_COLUMNS
        ))
        .bind(experiment_id)
        .bind(student_id)
        .bind(SubmissionStatus::Submitted.as_str())
        .fetch_optional(&mut *self.tx)
        .await?;
        Ok(attempt)
    }

    async fn insert_attempt(&mut self, attempt: &ExperimentSubmission) -> Result<bool, AppError> {
        // Partial unique index uq_submissions_open_attempt allows one in-progress row per pair.
        let result = sqlx::query(
            "INSERT INTO experiment_submissions \
             (id, experiment_id, student_id, status, total_score, submitted_at, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8) \
             ON CONFLICT (experiment_id, student_id) WHERE status = 'in_progress' DO NOTHING",
        )
        .bind(attempt.id)
        .bind(attempt.experiment_id)
        .bind(attempt.student_id)
        .bind(attempt.status.as_str())
        .bind(attempt.total_score)
        .bind(attempt.submitted_at)
        .bind(attempt.created_at)
        .bind(attempt.updated_at)
        .execute(&mut *self.tx)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn touch_attempt(&mut self, id: Uuid, now: DateTime<Utc>) -> Result<bool, AppError> {
        // Waits for any transaction holding the row; the status is re-checked after it ends.
        let result = sqlx::query(
            "UPDATE experiment_submissions SET updated_at = $2 WHERE id = $1 AND status = $3",
        )
        .bind(id)
        .bind(now)
        .bind(SubmissionStatus::InProgress.as_str())
        .execute(&mut *self.tx)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn finish_attempt(
        &mut self,
        id: Uuid,
        total_score: i32,
        now: DateTime<Utc>,
    ) -> Result<(), AppError> {
        let result = sqlx::query(
            "UPDATE experiment_submissions \
             SET status = $2, total_score = $3, submitted_at = $4, updated_at = $4 \
             WHERE id = $1 AND status = $5",
        )
        .bind(id)
        .bind(SubmissionStatus::Submitted.as_str())
        .bind(total_score)
        .bind(now)
        .bind(SubmissionStatus::InProgress.as_str())
        .execute(&mut *self.tx)
        .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::Conflict(format!(
                "Submission {} is not in progress",
                id
            )));
        }
        Ok(())
    }

    async fn find_answer(
        &mut self,
        submission_id: Uuid,
        question_id: Uuid,
    ) -> Result<Option<QuestionSubmission>, AppError> {
        let row = sqlx::query_as::<_, QuestionSubmission>(&format!(
            "SELECT {} FROM question_submissions WHERE submission_id = $1 AND question_id = $2",
            QUESTION_SUBMISSION_COLUMNS
        ))
        .bind(submission_id)
        .bind(question_id)
        .fetch_optional(&mut *self.tx)
        .await?;
        Ok(row)
    }

    async fn insert_answer(&mut self, row: &QuestionSubmission) -> Result<(), AppError> {
        let (answer, code, language) = row.answer_columns();
        sqlx::query(
            "INSERT INTO question_submissions \
             (id, submission_id, question_id, type, perfect_score, answer, code, language, \
              score, feedback, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)",
        )
        .bind(row.id)
        .bind(row.submission_id)
        .bind(row.question_id)
        .bind(row.question_type.as_str())
        .bind(row.perfect_score)
        .bind(answer)
        .bind(code)
        .bind(language)
        .bind(row.score)
        .bind(&row.feedback)
        .bind(row.created_at)
        .bind(row.updated_at)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| {
            if crate::error::is_unique_violation(&e) {
                AppError::Conflict(format!(
                    "Question {} already answered in submission {}",
                    row.question_id, row.submission_id
                ))
            } else {
                AppError::from(e)
            }
        })?;
        Ok(())
    }

    async fn update_answer(&mut self, row: &QuestionSubmission) -> Result<(), AppError> {
        let (answer, code, language) = row.answer_columns();
        sqlx::query(
            "UPDATE question_submissions \
             SET type = $8, perfect_score = $9, answer = $2, code = $3, language = $4, \
                 score = $5, feedback = $6, updated_at = $7 \
             WHERE id = $1",
        )
        .bind(row.id)
        .bind(answer)
        .bind(code)
        .bind(language)
        .bind(row.score)
        .bind(&row.feedback)
        .bind(row.updated_at)
        .bind(row.question_type.as_str())
        .bind(row.perfect_score)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn list_answers(&mut self, submission_id: Uuid) -> Result<Vec<QuestionSubmission>, AppError> {
        let rows = sqlx::query_as::<_, QuestionSubmission>(&format!(
            "SELECT {} FROM question_submissions WHERE submission_id = $1 ORDER BY created_at",
            QUESTION_SUBMISSION_COLUMNS
        ))
        .bind(submission_id)
        .fetch_all(&mut *self.tx)
        .await?;
        Ok(rows)
    }

    async fn commit(self: Box<Self>) -> Result<(), AppError> {
        self.tx.commit().await?;
        Ok(())
    }
}
