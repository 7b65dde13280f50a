//! In-process `SubmissionStore`.
//!
//! A transaction works on a private copy of the state and publishes it on commit,
//! so dropped transactions leave no trace. Concurrent transactions are last-commit-wins.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::{
    error::AppError,
    grading::store::{StoreTx, SubmissionStore},
    models::{
        experiment::Experiment,
        question::Question,
        submission::{ExperimentSubmission, QuestionSubmission, SubmissionStatus},
    },
};

#[derive(Debug, Clone, Default)]
struct MemoryState {
    experiments: HashMap<Uuid, Experiment>,
    questions: Vec<Question>,
    attempts: Vec<ExperimentSubmission>,
    answers: Vec<QuestionSubmission>,
}

#[derive(Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Registers an experiment and its questions.
    pub fn add_experiment(&self, experiment: Experiment, questions: Vec<Question>) {
        let mut state = self.lock();
        state.questions.retain(|q| q.experiment_id != experiment.id);
        state.questions.extend(questions);
        state.experiments.insert(experiment.id, experiment);
    }

    /// Every attempt of a student at an experiment, oldest first.
    pub fn attempts(&self, experiment_id: Uuid, student_id: i64) -> Vec<ExperimentSubmission> {
        self.lock()
            .attempts
            .iter()
            .filter(|a| a.experiment_id == experiment_id && a.student_id == student_id)
            .cloned()
            .collect()
    }

    pub fn answers(&self, submission_id: Uuid) -> Vec<QuestionSubmission> {
        self.lock()
            .answers
            .iter()
            .filter(|a| a.submission_id == submission_id)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl SubmissionStore for MemoryStore {
    async fn find_experiment(&self, id: Uuid) -> Result<Option<Experiment>, AppError> {
        Ok(self.lock().experiments.get(&id).cloned())
    }

    async fn begin(&self) -> Result<Box<dyn StoreTx>, AppError> {
        let working = self.lock().clone();
        Ok(Box::new(MemoryTx {
            shared: self.state.clone(),
            working,
        }))
    }
}

struct MemoryTx {
    shared: Arc<Mutex<MemoryState>>,
    working: MemoryState,
}

impl MemoryTx {
    fn attempt_mut(&mut self, id: Uuid) -> Result<&mut ExperimentSubmission, AppError> {
        self.working
            .attempts
            .iter_mut()
            .find(|a| a.id == id)
            .ok_or_else(|| AppError::NotFound(format!("Submission {} not found", id)))
    }
}

#[async_trait]
impl StoreTx for MemoryTx {
    async fn find_experiment(&mut self, id: Uuid) -> Result<Option<Experiment>, AppError> {
        Ok(self.working.experiments.get(&id).cloned())
    }

    async fn experiment_questions(&mut self, experiment_id: Uuid) -> Result<Vec<Question>, AppError> {
        let mut questions: Vec<Question> = self
            .working
            .questions
            .iter()
            .filter(|q| q.experiment_id == experiment_id)
            .cloned()
            .collect();
        questions.sort_by_key(|q| q.position);
        Ok(questions)
    }

    async fn find_open_attempt(
        &mut self,
        experiment_id: Uuid,
        student_id: i64,
    ) -> Result<Option<ExperimentSubmission>, AppError> {
        Ok(self
            .working
            .attempts
            .iter()
            .filter(|a| {
                a.experiment_id == experiment_id
                    && a.student_id == student_id
                    && a.status != SubmissionStatus::Submitted
            })
            .max_by_key(|a| a.created_at)
            .cloned())
    }

    async fn insert_attempt(&mut self, attempt: &ExperimentSubmission) -> Result<bool, AppError> {
        let open_exists = self.working.attempts.iter().any(|a| {
            a.experiment_id == attempt.experiment_id
                && a.student_id == attempt.student_id
                && a.status == SubmissionStatus::InProgress
        });
        if open_exists {
            return Ok(false);
        }
        self.working.attempts.push(attempt.clone());
        Ok(true)
    }

    async fn touch_attempt(&mut self, id: Uuid, now: DateTime<Utc>) -> Result<bool, AppError> {
        let attempt = self.attempt_mut(id)?;
        if attempt.status != SubmissionStatus::InProgress {
            return Ok(false);
        }
        attempt.updated_at = now;
        Ok(true)
    }

    async fn finish_attempt(
        &mut self,
        id: Uuid,
        total_score: i32,
        now: DateTime<Utc>,
    ) -> Result<(), AppError> {
        let attempt = self.attempt_mut(id)?;
        if attempt.status != SubmissionStatus::InProgress {
            return Err(AppError::Conflict(format!(
                "Submission {} is not in progress",
                id
            )));
        }
        attempt.status = SubmissionStatus::Submitted;
        attempt.total_score = total_score;
        attempt.submitted_at = now;
        attempt.updated_at = now;
        Ok(())
    }

    async fn find_answer(
        &mut self,
        submission_id: Uuid,
        question_id: Uuid,
    ) -> Result<Option<QuestionSubmission>, AppError> {
        Ok(self
            .working
            .answers
            .iter()
            .find(|a| a.submission_id == submission_id && a.question_id == question_id)
            .cloned())
    }

    async fn insert_answer(&mut self, row: &QuestionSubmission) -> Result<(), AppError> {
        let duplicate = self
            .working
            .answers
            .iter()
            .any(|a| a.submission_id == row.submission_id && a.question_id == row.question_id);
        if duplicate {
            return Err(AppError::Conflict(format!(
                "Question {} already answered in submission {}",
                row.question_id, row.submission_id
            )));
        }
        self.working.answers.push(row.clone());
        Ok(())
    }

    async fn update_answer(&mut self, row: &QuestionSubmission) -> Result<(), AppError> {
        let existing = self
            .working
            .answers
            .iter_mut()
            .find(|a| a.id == row.id)
            .ok_or_else(|| AppError::NotFound(format!("Answer {} not found", row.id)))?;
        *existing = row.clone();
        Ok(())
    }

    async fn list_answers(&mut self, submission_id: Uuid) -> Result<Vec<QuestionSubmission>, AppError> {
        Ok(self
            .working
            .answers
            .iter()
            .filter(|a| a.submission_id == submission_id)
            .cloned()
            .collect())
    }

    async fn commit(self: Box<Self>) -> Result<(), AppError> {
        let MemoryTx { shared, working } = *self;
        let mut state = shared.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        *state = working;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grading::store::current_attempt;
    use chrono::Duration;

    fn experiment() -> Experiment {
        let now = Utc::now();
        Experiment {
            id: Uuid::new_v4(),
            title: "Lab".to_string(),
            description: String::new(),
            permission: 0,
            deadline: now + Duration::days(1),
            created_at: now,
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn dropped_transaction_leaves_no_trace() {
        let store = MemoryStore::new();
        let exp = experiment();
        store.add_experiment(exp.clone(), vec![]);

        {
            let mut tx = store.begin().await.unwrap();
            current_attempt(tx.as_mut(), exp.id, 7, Utc::now()).await.unwrap();
            // no commit
        }

        assert!(store.attempts(exp.id, 7).is_empty());
    }

    #[tokio::test]
    async fn committed_attempt_is_reused() {
        let store = MemoryStore::new();
        let exp = experiment();
        store.add_experiment(exp.clone(), vec![]);

        let mut tx = store.begin().await.unwrap();
        let first = current_attempt(tx.as_mut(), exp.id, 7, Utc::now()).await.unwrap();
        tx.commit().await.unwrap();

        let mut tx = store.begin().await.unwrap();
        let second = current_attempt(tx.as_mut(), exp.id, 7, Utc::now()).await.unwrap();
        tx.commit().await.unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(store.attempts(exp.id, 7).len(), 1);
    }

    #[tokio::test]
    async fn second_open_attempt_is_refused() {
        let store = MemoryStore::new();
        let exp = experiment();
        let now = Utc::now();

        let mut tx = store.begin().await.unwrap();
        assert!(tx.insert_attempt(&ExperimentSubmission::new_attempt(exp.id, 1, now)).await.unwrap());
        assert!(!tx.insert_attempt(&ExperimentSubmission::new_attempt(exp.id, 1, now)).await.unwrap());
        assert!(tx.insert_attempt(&ExperimentSubmission::new_attempt(exp.id, 2, now)).await.unwrap());
    }

    #[tokio::test]
    async fn submitted_attempt_is_never_finished_again() {
        let store = MemoryStore::new();
        let exp = experiment();
        store.add_experiment(exp.clone(), vec![]);
        let now = Utc::now();

        let mut tx = store.begin().await.unwrap();
        let attempt = current_attempt(tx.as_mut(), exp.id, 7, now).await.unwrap();
        tx.finish_attempt(attempt.id, 12, now).await.unwrap();

        assert!(!tx.touch_attempt(attempt.id, now).await.unwrap());
        let err = tx.finish_attempt(attempt.id, 0, now).await.unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));
        tx.commit().await.unwrap();

        let attempts = store.attempts(exp.id, 7);
        assert_eq!(attempts.len(), 1);
        assert_eq!(attempts[0].total_score, 12);
    }

    #[tokio::test]
    async fn submitted_attempt_is_followed_by_a_fresh_one() {
        let store = MemoryStore::new();
        let exp = experiment();
        store.add_experiment(exp.clone(), vec![]);
        let now = Utc::now();

        let mut tx = store.begin().await.unwrap();
        let first = current_attempt(tx.as_mut(), exp.id, 7, now).await.unwrap();
        tx.finish_attempt(first.id, 5, now).await.unwrap();
        let second = current_attempt(tx.as_mut(), exp.id, 7, now).await.unwrap();
        tx.commit().await.unwrap();

        assert_ne!(first.id, second.id);
        assert_eq!(second.status, SubmissionStatus::InProgress);
        assert_eq!(store.attempts(exp.id, 7).len(), 2);
    }
}
