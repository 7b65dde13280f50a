//! Turns an `answers` batch into upserts on `question_submissions`.
//!
//! Work happens in two phases so callers can score between them: `plan` validates the
//! whole batch and builds the rows, `apply` writes them.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::{
    error::AppError,
    grading::store::StoreTx,
    models::{
        question::Question,
        submission::{AnswerInput, ExperimentSubmission, QuestionSubmission},
    },
};

/// A row ready to be written, with the question it answers.
#[derive(Debug, Clone)]
pub struct PlannedAnswer {
    pub question: Question,
    pub row: QuestionSubmission,
    /// `true` when the row already exists and must be updated rather than inserted.
    pub exists: bool,
}

/// Indexes questions by id.
pub fn index_questions(questions: Vec<Question>) -> HashMap<Uuid, Question> {
    questions.into_iter().map(|q| (q.id, q)).collect()
}

/// Validates every answer, then builds one row per distinct question.
///
/// Fails before anything is built if any answer targets a question outside the
/// attempt's experiment or carries the wrong answer kind. When a question appears
/// more than once the last answer wins.
pub async fn plan(
    tx: &mut dyn StoreTx,
    submission: &ExperimentSubmission,
    questions: &HashMap<Uuid, Question>,
    answers: &[AnswerInput],
    now: DateTime<Utc>,
) -> Result<Vec<PlannedAnswer>, AppError> {
    for input in answers {
        let question = questions.get(&input.question_id).ok_or_else(|| {
            AppError::BadRequest(format!(
                "Question {} does not belong to experiment {}",
                input.question_id, submission.experiment_id
            ))
        })?;

        let given = input.payload.question_type();
        if given != question.question_type() {
            return Err(AppError::BadRequest(format!(
                "Question {} expects a {} answer, got {}",
                question.id,
                question.question_type(),
                given
            )));
        }
    }

    let mut planned: Vec<PlannedAnswer> = Vec::with_capacity(answers.len());
    let mut seen: HashMap<Uuid, usize> = HashMap::new();

    for input in answers {
        if let Some(&idx) = seen.get(&input.question_id) {
            planned[idx].row.answer = input.payload.clone();
            continue;
        }

        let question = questions[&input.question_id].clone();
        let entry = match tx.find_answer(submission.id, input.question_id).await? {
            Some(mut row) => {
                // The question may have been edited since the row was written.
                row.question_type = question.question_type();
                row.perfect_score = question.score;
                row.answer = input.payload.clone();
                row.updated_at = now;
                PlannedAnswer {
                    question,
                    row,
                    exists: true,
                }
            }
            None => PlannedAnswer {
                row: QuestionSubmission {
                    id: Uuid::new_v4(),
                    submission_id: submission.id,
                    question_id: question.id,
                    question_type: question.question_type(),
                    perfect_score: question.score,
                    answer: input.payload.clone(),
                    score: 0,
                    feedback: String::new(),
                    created_at: now,
                    updated_at: now,
                },
                question,
                exists: false,
            },
        };

        seen.insert(input.question_id, planned.len());
        planned.push(entry);
    }

    Ok(planned)
}

/// Writes planned rows and returns them as stored.
pub async fn apply(
    tx: &mut dyn StoreTx,
    planned: Vec<PlannedAnswer>,
) -> Result<Vec<QuestionSubmission>, AppError> {
    let mut rows = Vec::with_capacity(planned.len());
    for entry in planned {
        if entry.exists {
            tx.update_answer(&entry.row).await?;
        } else {
            tx.insert_answer(&entry.row).await?;
        }
        rows.push(entry.row);
    }
    Ok(rows)
}

/// `plan` followed by `apply`, loading the experiment's questions first.
pub async fn reconcile(
    tx: &mut dyn StoreTx,
    submission: &ExperimentSubmission,
    answers: &[AnswerInput],
    now: DateTime<Utc>,
) -> Result<Vec<QuestionSubmission>, AppError> {
    let questions = index_questions(tx.experiment_questions(submission.experiment_id).await?);
    let planned = plan(tx, submission, &questions, answers, now).await?;
    apply(tx, planned).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grading::memory::MemoryStore;
    use crate::grading::store::{SubmissionStore, current_attempt};
    use crate::models::experiment::Experiment;
    use crate::models::question::QuestionKind;
    use crate::models::submission::{AnswerPayload, Language};
    use chrono::Duration;

    struct Fixture {
        store: MemoryStore,
        experiment: Experiment,
        choice: Question,
        code: Question,
    }

    fn fixture() -> Fixture {
        let now = Utc::now();
        let experiment = Experiment {
            id: Uuid::new_v4(),
            title: "Lab".to_string(),
            description: String::new(),
            permission: 0,
            deadline: now + Duration::days(1),
            created_at: now,
            updated_at: now,
        };
        let choice = Question {
            id: Uuid::new_v4(),
            experiment_id: experiment.id,
            position: 0,
            content: "Pick A".to_string(),
            score: 10,
            kind: QuestionKind::Choice {
                options: vec!["A".to_string(), "B".to_string()],
                correct_answer: "A".to_string(),
            },
            image_url: None,
            explanation: None,
        };
        let code = Question {
            id: Uuid::new_v4(),
            experiment_id: experiment.id,
            position: 1,
            content: "Echo".to_string(),
            score: 20,
            kind: QuestionKind::Code {
                test_cases: "[]".to_string(),
            },
            image_url: None,
            explanation: None,
        };
        let store = MemoryStore::new();
        store.add_experiment(experiment.clone(), vec![choice.clone(), code.clone()]);
        Fixture {
            store,
            experiment,
            choice,
            code,
        }
    }

    fn choice_answer(question_id: Uuid, answer: &str) -> AnswerInput {
        AnswerInput {
            question_id,
            payload: AnswerPayload::Choice {
                answer: answer.to_string(),
            },
        }
    }

    #[tokio::test]
    async fn reconcile_twice_keeps_one_row() {
        let f = fixture();
        let answers = vec![choice_answer(f.choice.id, "B")];

        let mut tx = f.store.begin().await.unwrap();
        let attempt = current_attempt(tx.as_mut(), f.experiment.id, 1, Utc::now()).await.unwrap();
        let first = reconcile(tx.as_mut(), &attempt, &answers, Utc::now()).await.unwrap();
        let second = reconcile(tx.as_mut(), &attempt, &answers, Utc::now()).await.unwrap();
        tx.commit().await.unwrap();

        assert_eq!(first[0].id, second[0].id);
        let stored = f.store.answers(attempt.id);
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].perfect_score, 10);
        assert_eq!(stored[0].answer.text(), Some("B"));
    }

    #[tokio::test]
    async fn switching_answer_kind_is_rejected() {
        let f = fixture();
        let answers = vec![AnswerInput {
            question_id: f.code.id,
            payload: AnswerPayload::Blank {
                answer: "oops".to_string(),
            },
        }];

        let mut tx = f.store.begin().await.unwrap();
        let attempt = current_attempt(tx.as_mut(), f.experiment.id, 1, Utc::now()).await.unwrap();
        let err = reconcile(tx.as_mut(), &attempt, &answers, Utc::now()).await.unwrap_err();
        assert!(matches!(err, AppError::BadRequest(_)));
    }

    #[tokio::test]
    async fn foreign_question_rejects_whole_batch() {
        let f = fixture();
        let answers = vec![
            choice_answer(f.choice.id, "A"),
            choice_answer(Uuid::new_v4(), "A"),
        ];

        let mut tx = f.store.begin().await.unwrap();
        let attempt = current_attempt(tx.as_mut(), f.experiment.id, 1, Utc::now()).await.unwrap();
        let err = reconcile(tx.as_mut(), &attempt, &answers, Utc::now()).await.unwrap_err();

        assert!(err.to_string().contains("does not belong to experiment"));
        assert!(tx.list_answers(attempt.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn repeated_question_keeps_last_answer() {
        let f = fixture();
        let answers = vec![
            choice_answer(f.choice.id, "A"),
            AnswerInput {
                question_id: f.code.id,
                payload: AnswerPayload::Code {
                    code: "print(1)".to_string(),
                    language: Language::Python,
                },
            },
            choice_answer(f.choice.id, "B"),
        ];

        let mut tx = f.store.begin().await.unwrap();
        let attempt = current_attempt(tx.as_mut(), f.experiment.id, 1, Utc::now()).await.unwrap();
        let rows = reconcile(tx.as_mut(), &attempt, &answers, Utc::now()).await.unwrap();

        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].answer.text(), Some("B"));
        assert_eq!(rows[1].question_type.as_str(), "code");
    }

    #[tokio::test]
    async fn edited_question_rewrites_stored_row() {
        let f = fixture();

        let mut tx = f.store.begin().await.unwrap();
        let attempt = current_attempt(tx.as_mut(), f.experiment.id, 1, Utc::now()).await.unwrap();
        reconcile(tx.as_mut(), &attempt, &[choice_answer(f.choice.id, "A")], Utc::now())
            .await
            .unwrap();
        tx.commit().await.unwrap();

        // The teacher turns the choice question into a code question worth more.
        let mut edited = f.choice.clone();
        edited.score = 15;
        edited.kind = QuestionKind::Code {
            test_cases: "[]".to_string(),
        };
        f.store
            .add_experiment(f.experiment.clone(), vec![edited.clone(), f.code.clone()]);

        let answers = vec![AnswerInput {
            question_id: edited.id,
            payload: AnswerPayload::Code {
                code: "print(1)".to_string(),
                language: Language::Python,
            },
        }];
        let mut tx = f.store.begin().await.unwrap();
        let attempt = current_attempt(tx.as_mut(), f.experiment.id, 1, Utc::now()).await.unwrap();
        reconcile(tx.as_mut(), &attempt, &answers, Utc::now()).await.unwrap();
        tx.commit().await.unwrap();

        let stored = f.store.answers(attempt.id);
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].question_type, edited.question_type());
        assert_eq!(stored[0].answer.question_type(), stored[0].question_type);
        assert_eq!(stored[0].perfect_score, 15);
    }
}
