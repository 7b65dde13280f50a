//! Draft saving and final submission of an attempt.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::{
    error::AppError,
    grading::{
        judge::Judge,
        reconciler::{self, index_questions},
        scoring::ScoringEngine,
        store::{StoreTx, SubmissionStore, current_attempt},
    },
    models::{
        experiment::Experiment,
        question::QuestionType,
        submission::{AnswerInput, ExperimentSubmission},
    },
};

#[derive(Debug, Serialize)]
pub struct SavedQuestion {
    pub question_id: Uuid,
    pub question_submission_id: Uuid,
    pub updated_at: DateTime<Utc>,
}

/// Result of saving a draft.
#[derive(Debug, Serialize)]
pub struct DraftState {
    pub submission_id: Uuid,
    pub student_id: i64,
    pub experiment_id: Uuid,
    pub updated_at: DateTime<Utc>,
    /// Every answer stored on the attempt so far, not only this batch.
    pub saved_questions: Vec<SavedQuestion>,
}

#[derive(Debug, Serialize)]
pub struct QuestionResult {
    pub question_id: Uuid,
    #[serde(rename = "type")]
    pub question_type: QuestionType,
    pub score: i32,
    pub perfect_score: i32,
    pub feedback: String,
}

/// Result of finalizing an attempt.
#[derive(Debug, Serialize)]
pub struct FinalizedSubmission {
    pub submission_id: Uuid,
    pub experiment_id: Uuid,
    pub student_id: i64,
    pub total_score: i32,
    /// Sum of the scores of every question in the experiment.
    pub perfect_score: i32,
    pub results: Vec<QuestionResult>,
    pub submitted_at: DateTime<Utc>,
}

/// Runs the student-side submission workflow on top of a `SubmissionStore`.
#[derive(Clone)]
pub struct Grader {
    store: Arc<dyn SubmissionStore>,
    scoring: ScoringEngine,
}

impl Grader {
    pub fn new(store: Arc<dyn SubmissionStore>, judge: Arc<dyn Judge>) -> Self {
        Self {
            store,
            scoring: ScoringEngine::new(judge),
        }
    }

    async fn load_experiment(
        tx: &mut dyn StoreTx,
        experiment_id: Uuid,
    ) -> Result<Experiment, AppError> {
        tx.find_experiment(experiment_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Experiment {} not found", experiment_id)))
    }

    /// Returns the student's open attempt, creating it if needed.
    pub async fn current_attempt(
        &self,
        experiment_id: Uuid,
        student_id: i64,
    ) -> Result<ExperimentSubmission, AppError> {
        let mut tx = self.store.begin().await?;
        Self::load_experiment(tx.as_mut(), experiment_id).await?;
        let attempt = current_attempt(tx.as_mut(), experiment_id, student_id, Utc::now()).await?;
        tx.commit().await?;
        Ok(attempt)
    }

    /// Stores answers on the open attempt without scoring them.
    pub async fn save_draft(
        &self,
        experiment_id: Uuid,
        student_id: i64,
        answers: &[AnswerInput],
    ) -> Result<DraftState, AppError> {
        if answers.is_empty() {
            return Err(AppError::BadRequest("No answers submitted".to_string()));
        }

        let now = Utc::now();
        let mut tx = self.store.begin().await?;
        Self::load_experiment(tx.as_mut(), experiment_id).await?;

        let attempt = current_attempt(tx.as_mut(), experiment_id, student_id, now).await?;
        reconciler::reconcile(tx.as_mut(), &attempt, answers, now).await?;
        let stored = tx.list_answers(attempt.id).await?;
        tx.commit().await?;

        tracing::info!(
            "Student {} saved {} answer(s) on submission {}",
            student_id,
            answers.len(),
            attempt.id
        );

        Ok(DraftState {
            submission_id: attempt.id,
            student_id,
            experiment_id,
            updated_at: attempt.updated_at,
            saved_questions: stored
                .into_iter()
                .map(|row| SavedQuestion {
                    question_id: row.question_id,
                    question_submission_id: row.id,
                    updated_at: row.updated_at,
                })
                .collect(),
        })
    }

    /// Scores the answers in this request, stores them and closes the attempt.
    ///
    /// Only the answers in the request are scored; questions left out count zero toward
    /// `total_score` but still toward `perfect_score`. Nothing is written if any step fails.
    pub async fn finalize(
        &self,
        experiment_id: Uuid,
        student_id: i64,
        answers: &[AnswerInput],
    ) -> Result<FinalizedSubmission, AppError> {
        let now = Utc::now();

        let experiment = self
            .store
            .find_experiment(experiment_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Experiment {} not found", experiment_id)))?;
        if !experiment.allows_late_submission() && now > experiment.deadline {
            return Err(AppError::DeadlineExceeded);
        }

        let mut tx = self.store.begin().await?;
        let attempt = current_attempt(tx.as_mut(), experiment_id, student_id, now).await?;

        let all_questions = tx.experiment_questions(experiment_id).await?;
        let perfect_score: i32 = all_questions.iter().map(|q| q.score).sum();
        let questions = index_questions(all_questions);

        let mut planned = reconciler::plan(tx.as_mut(), &attempt, &questions, answers, now).await?;

        let mut total_score = 0;
        let mut results = Vec::with_capacity(planned.len());
        for entry in planned.iter_mut() {
            let outcome = self.scoring.score(&entry.question, &entry.row.answer).await;
            entry.row.score = outcome.score;
            entry.row.feedback = outcome.feedback;
            total_score += outcome.score;

            results.push(QuestionResult {
                question_id: entry.question.id,
                question_type: entry.row.question_type,
                score: entry.row.score,
                perfect_score: entry.row.perfect_score,
                feedback: entry.row.feedback.clone(),
            });
        }

        reconciler::apply(tx.as_mut(), planned).await?;
        tx.finish_attempt(attempt.id, total_score, now).await?;
        tx.commit().await?;

        tracing::info!(
            "Submission {} finalized: {}/{} (experiment {}, student {})",
            attempt.id,
            total_score,
            perfect_score,
            experiment_id,
            student_id
        );

        Ok(FinalizedSubmission {
            submission_id: attempt.id,
            experiment_id,
            student_id,
            total_score,
            perfect_score,
            results,
            submitted_at: now,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grading::judge::StaticJudge;
    use crate::grading::memory::MemoryStore;
    use crate::models::question::{Question, QuestionKind};
    use crate::models::submission::{AnswerPayload, Language, SubmissionStatus};
    use chrono::Duration;

    struct Fixture {
        store: MemoryStore,
        judge: Arc<StaticJudge>,
        grader: Grader,
        experiment: Experiment,
        choice: Question,
        blank: Question,
        code: Question,
    }

    fn fixture_with(judge: StaticJudge, permission: i16, deadline: DateTime<Utc>) -> Fixture {
        let now = Utc::now();
        let experiment = Experiment {
            id: Uuid::new_v4(),
            title: "Lab".to_string(),
            description: String::new(),
            permission,
            deadline,
            created_at: now,
            updated_at: now,
        };
        let question = |position: i32, score: i32, kind: QuestionKind| Question {
            id: Uuid::new_v4(),
            experiment_id: experiment.id,
            position,
            content: format!("Question {}", position),
            score,
            kind,
            image_url: None,
            explanation: None,
        };
        let choice = question(
            0,
            10,
            QuestionKind::Choice {
                options: vec!["A".to_string(), "B".to_string()],
                correct_answer: "A".to_string(),
            },
        );
        let blank = question(
            1,
            5,
            QuestionKind::Blank {
                correct_answer: "Paris".to_string(),
            },
        );
        let code = question(
            2,
            20,
            QuestionKind::Code {
                test_cases: r#"[{"input":"1","expected_output":"1"}]"#.to_string(),
            },
        );

        let store = MemoryStore::new();
        store.add_experiment(
            experiment.clone(),
            vec![choice.clone(), blank.clone(), code.clone()],
        );
        let judge = Arc::new(judge);
        let grader = Grader::new(Arc::new(store.clone()), judge.clone());

        Fixture {
            store,
            judge,
            grader,
            experiment,
            choice,
            blank,
            code,
        }
    }

    fn fixture(judge: StaticJudge) -> Fixture {
        fixture_with(judge, 0, Utc::now() + Duration::days(1))
    }

    fn choice(question_id: Uuid, answer: &str) -> AnswerInput {
        AnswerInput {
            question_id,
            payload: AnswerPayload::Choice {
                answer: answer.to_string(),
            },
        }
    }

    fn blank(question_id: Uuid, answer: &str) -> AnswerInput {
        AnswerInput {
            question_id,
            payload: AnswerPayload::Blank {
                answer: answer.to_string(),
            },
        }
    }

    fn code(question_id: Uuid) -> AnswerInput {
        AnswerInput {
            question_id,
            payload: AnswerPayload::Code {
                code: "print(input())".to_string(),
                language: Language::Python,
            },
        }
    }

    #[tokio::test]
    async fn save_then_submit_scores_every_kind() {
        let f = fixture(StaticJudge::passing(2, 3));

        let draft = f
            .grader
            .save_draft(f.experiment.id, 1, &[choice(f.choice.id, "B")])
            .await
            .unwrap();
        assert_eq!(draft.saved_questions.len(), 1);

        let result = f
            .grader
            .finalize(
                f.experiment.id,
                1,
                &[choice(f.choice.id, "A"), blank(f.blank.id, "Paris"), code(f.code.id)],
            )
            .await
            .unwrap();

        assert_eq!(result.submission_id, draft.submission_id);
        // 10 + 5 + floor(20 * 2/3)
        assert_eq!(result.total_score, 28);
        assert_eq!(result.perfect_score, 35);
        assert_eq!(result.results.len(), 3);
        assert_eq!(result.results[2].feedback, "Passed 2/3 test cases");

        let attempts = f.store.attempts(f.experiment.id, 1);
        assert_eq!(attempts.len(), 1);
        assert_eq!(attempts[0].status, SubmissionStatus::Submitted);
        assert_eq!(attempts[0].total_score, 28);
        assert_eq!(attempts[0].submitted_at, result.submitted_at);

        let rows = f.store.answers(draft.submission_id);
        assert_eq!(rows.len(), 3);
        let choice_row = rows.iter().find(|r| r.question_id == f.choice.id).unwrap();
        assert_eq!(choice_row.answer.text(), Some("A"));
        assert_eq!(choice_row.score, 10);
    }

    #[tokio::test]
    async fn empty_draft_is_rejected() {
        let f = fixture(StaticJudge::passing(1, 1));
        let err = f.grader.save_draft(f.experiment.id, 1, &[]).await.unwrap_err();
        assert!(matches!(err, AppError::BadRequest(_)));
        assert!(f.store.attempts(f.experiment.id, 1).is_empty());
    }

    #[tokio::test]
    async fn submitting_after_finalize_opens_a_new_attempt() {
        let f = fixture(StaticJudge::passing(1, 1));

        let first = f
            .grader
            .finalize(f.experiment.id, 1, &[choice(f.choice.id, "A")])
            .await
            .unwrap();
        let second = f
            .grader
            .finalize(f.experiment.id, 1, &[choice(f.choice.id, "B")])
            .await
            .unwrap();

        assert_ne!(first.submission_id, second.submission_id);
        assert_eq!(second.total_score, 0);

        let attempts = f.store.attempts(f.experiment.id, 1);
        assert_eq!(attempts.len(), 2);
        let original = attempts.iter().find(|a| a.id == first.submission_id).unwrap();
        assert_eq!(original.total_score, 10);
        assert_eq!(f.store.answers(first.submission_id)[0].answer.text(), Some("A"));
    }

    #[tokio::test]
    async fn deadline_blocks_submission_without_late_permission() {
        let f = fixture_with(StaticJudge::passing(1, 1), 0, Utc::now() - Duration::hours(1));
        let err = f
            .grader
            .finalize(f.experiment.id, 1, &[choice(f.choice.id, "A")])
            .await
            .unwrap_err();

        assert!(matches!(err, AppError::DeadlineExceeded));
        assert!(f.store.attempts(f.experiment.id, 1).is_empty());
    }

    #[tokio::test]
    async fn late_submission_allowed_with_permission() {
        let f = fixture_with(StaticJudge::passing(1, 1), 1, Utc::now() - Duration::hours(1));
        let result = f
            .grader
            .finalize(f.experiment.id, 1, &[choice(f.choice.id, "A")])
            .await
            .unwrap();
        assert_eq!(result.total_score, 10);
    }

    #[tokio::test]
    async fn drafts_are_accepted_after_the_deadline() {
        let f = fixture_with(StaticJudge::passing(1, 1), 0, Utc::now() - Duration::hours(1));
        let draft = f
            .grader
            .save_draft(f.experiment.id, 1, &[choice(f.choice.id, "A")])
            .await
            .unwrap();
        assert_eq!(draft.saved_questions.len(), 1);
    }

    #[tokio::test]
    async fn invalid_answer_rolls_back_everything() {
        let f = fixture(StaticJudge::passing(1, 1));
        let draft = f
            .grader
            .save_draft(f.experiment.id, 1, &[choice(f.choice.id, "B")])
            .await
            .unwrap();

        let err = f
            .grader
            .finalize(
                f.experiment.id,
                1,
                &[choice(f.choice.id, "A"), choice(Uuid::new_v4(), "A")],
            )
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::BadRequest(_)));

        let attempts = f.store.attempts(f.experiment.id, 1);
        assert_eq!(attempts.len(), 1);
        assert_eq!(attempts[0].status, SubmissionStatus::InProgress);
        let rows = f.store.answers(draft.submission_id);
        assert_eq!(rows[0].answer.text(), Some("B"));
        assert_eq!(rows[0].score, 0);
    }

    #[tokio::test]
    async fn unreachable_judge_still_finalizes() {
        let f = fixture(StaticJudge::unreachable("connection refused"));
        let result = f
            .grader
            .finalize(f.experiment.id, 1, &[choice(f.choice.id, "A"), code(f.code.id)])
            .await
            .unwrap();

        assert_eq!(result.total_score, 10);
        let code_line = result.results.iter().find(|r| r.question_id == f.code.id).unwrap();
        assert_eq!(code_line.score, 0);
        assert!(code_line.feedback.starts_with("Evaluation error"));
        assert_eq!(f.judge.call_count(), 1);
        assert_eq!(
            f.store.attempts(f.experiment.id, 1)[0].status,
            SubmissionStatus::Submitted
        );
    }

    #[tokio::test]
    async fn empty_submission_closes_attempt_with_zero() {
        let f = fixture(StaticJudge::passing(1, 1));
        let result = f.grader.finalize(f.experiment.id, 1, &[]).await.unwrap();
        assert_eq!(result.total_score, 0);
        assert_eq!(result.perfect_score, 35);
        assert!(result.results.is_empty());
    }

    #[tokio::test]
    async fn unknown_experiment_is_not_found() {
        let f = fixture(StaticJudge::passing(1, 1));
        let missing = Uuid::new_v4();
        assert!(matches!(
            f.grader.finalize(missing, 1, &[]).await,
            Err(AppError::NotFound(_))
        ));
        assert!(matches!(
            f.grader.save_draft(missing, 1, &[choice(f.choice.id, "A")]).await,
            Err(AppError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn current_attempt_is_stable_until_finalized() {
        let f = fixture(StaticJudge::passing(1, 1));
        let a = f.grader.current_attempt(f.experiment.id, 9).await.unwrap();
        let b = f.grader.current_attempt(f.experiment.id, 9).await.unwrap();
        assert_eq!(a.id, b.id);
        assert!(b.updated_at >= a.updated_at);

        f.grader.finalize(f.experiment.id, 9, &[]).await.unwrap();
        let c = f.grader.current_attempt(f.experiment.id, 9).await.unwrap();
        assert_ne!(c.id, a.id);
        assert!(!c.is_submitted());
        let history = f.store.attempts(f.experiment.id, 9);
        assert!(history.iter().any(|h| h.id == a.id && h.is_submitted()));
    }
}
