//! Per-question scoring.

use std::sync::Arc;

use serde::Serialize;

use crate::{
    config::JUDGE_TIME_LIMIT_SECS,
    grading::judge::{EvaluationRequest, Judge, JudgeError},
    models::{
        question::{Question, QuestionKind, TestCase},
        submission::AnswerPayload,
    },
};

/// Score and feedback for one answered question.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScoreOutcome {
    pub score: i32,
    pub feedback: String,
}

impl ScoreOutcome {
    fn zero(feedback: String) -> Self {
        ScoreOutcome { score: 0, feedback }
    }
}

/// `floor(score * pass_rate / 100)`, with the pass rate clamped to 0..=100.
pub fn partial_score(score: i32, pass_rate: f64) -> i32 {
    let rate = if pass_rate.is_finite() {
        pass_rate.clamp(0.0, 100.0)
    } else {
        0.0
    };
    (f64::from(score) * rate / 100.0).floor() as i32
}

/// Scores answers. Choice and blank answers are compared exactly against the key;
/// code answers are sent to the judge.
#[derive(Clone)]
pub struct ScoringEngine {
    judge: Arc<dyn Judge>,
}

impl ScoringEngine {
    pub fn new(judge: Arc<dyn Judge>) -> Self {
        Self { judge }
    }

    pub async fn score(&self, question: &Question, answer: &AnswerPayload) -> ScoreOutcome {
        match &question.kind {
            QuestionKind::Choice { correct_answer, .. } | QuestionKind::Blank { correct_answer } => {
                if answer.text() == Some(correct_answer.as_str()) {
                    ScoreOutcome {
                        score: question.score,
                        feedback: "Correct".to_string(),
                    }
                } else {
                    ScoreOutcome::zero("Incorrect".to_string())
                }
            }
            QuestionKind::Code { test_cases } => match answer.code() {
                Some((code, language)) => {
                    match self.evaluate(test_cases, code, language.as_str()).await {
                        Ok((passed, total, pass_rate)) => ScoreOutcome {
                            score: partial_score(question.score, pass_rate),
                            feedback: format!("Passed {}/{} test cases", passed, total),
                        },
                        Err(e) => {
                            tracing::warn!("Code evaluation for question {} failed: {}", question.id, e);
                            ScoreOutcome::zero(format!("Evaluation error: {}", e))
                        }
                    }
                }
                None => ScoreOutcome::zero("Evaluation error: no source code submitted".to_string()),
            },
        }
    }

    async fn evaluate(
        &self,
        test_cases: &str,
        code: &str,
        language: &str,
    ) -> Result<(u32, u32, f64), JudgeError> {
        let test_cases: Vec<TestCase> =
            serde_json::from_str(test_cases).map_err(|_| JudgeError::InvalidTestCases)?;

        let request = EvaluationRequest {
            language: language.to_string(),
            source_code: code.to_string(),
            test_cases,
            time_limit: JUDGE_TIME_LIMIT_SECS,
        };

        let report = self.judge.evaluate(&request).await?;
        Ok((
            report.summary.passed_cases,
            report.summary.total_cases,
            report.summary.pass_rate,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grading::judge::StaticJudge;
    use crate::models::submission::Language;
    use uuid::Uuid;

    fn question(kind: QuestionKind, score: i32) -> Question {
        Question {
            id: Uuid::new_v4(),
            experiment_id: Uuid::new_v4(),
            position: 0,
            content: "q".to_string(),
            score,
            kind,
            image_url: None,
            explanation: None,
        }
    }

    fn choice(correct: &str, score: i32) -> Question {
        question(
            QuestionKind::Choice {
                options: vec!["A".to_string(), "B".to_string()],
                correct_answer: correct.to_string(),
            },
            score,
        )
    }

    fn code_question(score: i32) -> Question {
        question(
            QuestionKind::Code {
                test_cases: r#"[{"input":"1","expected_output":"1"}]"#.to_string(),
            },
            score,
        )
    }

    fn code_answer() -> AnswerPayload {
        AnswerPayload::Code {
            code: "print(input())".to_string(),
            language: Language::Python,
        }
    }

    fn engine(judge: StaticJudge) -> (ScoringEngine, Arc<StaticJudge>) {
        let judge = Arc::new(judge);
        (ScoringEngine::new(judge.clone()), judge)
    }

    #[tokio::test]
    async fn correct_choice_earns_full_score() {
        let (engine, _) = engine(StaticJudge::passing(0, 0));
        let outcome = engine
            .score(&choice("A", 10), &AnswerPayload::Choice { answer: "A".to_string() })
            .await;
        assert_eq!(outcome, ScoreOutcome { score: 10, feedback: "Correct".to_string() });
    }

    #[tokio::test]
    async fn comparison_is_case_sensitive() {
        let (engine, _) = engine(StaticJudge::passing(0, 0));
        let outcome = engine
            .score(&choice("A", 10), &AnswerPayload::Choice { answer: "a".to_string() })
            .await;
        assert_eq!(outcome.score, 0);
        assert_eq!(outcome.feedback, "Incorrect");
    }

    #[tokio::test]
    async fn blank_answers_match_exactly() {
        let (engine, _) = engine(StaticJudge::passing(0, 0));
        let q = question(QuestionKind::Blank { correct_answer: "Paris".to_string() }, 4);

        let hit = engine.score(&q, &AnswerPayload::Blank { answer: "Paris".to_string() }).await;
        let miss = engine.score(&q, &AnswerPayload::Blank { answer: "Paris ".to_string() }).await;
        assert_eq!(hit.score, 4);
        assert_eq!(miss.score, 0);
    }

    #[tokio::test]
    async fn code_score_is_floored_pass_rate() {
        let (engine, judge) = engine(StaticJudge::passing(2, 3));
        let outcome = engine.score(&code_question(20), &code_answer()).await;

        // 20 * 66.66 / 100 = 13.33 -> 13
        assert_eq!(outcome.score, 13);
        assert_eq!(outcome.feedback, "Passed 2/3 test cases");

        let sent = judge.last_request().unwrap();
        assert_eq!(sent.language, "python");
        assert_eq!(sent.time_limit, 2);
        assert_eq!(sent.test_cases.len(), 1);
    }

    #[tokio::test]
    async fn unreachable_judge_degrades_to_zero() {
        let (engine, _) = engine(StaticJudge::unreachable("connection refused"));
        let outcome = engine.score(&code_question(20), &code_answer()).await;
        assert_eq!(outcome.score, 0);
        assert!(outcome.feedback.starts_with("Evaluation error"));
        assert!(outcome.feedback.contains("connection refused"));
    }

    #[tokio::test]
    async fn malformed_test_cases_skip_the_judge() {
        let (engine, judge) = engine(StaticJudge::passing(1, 1));
        let q = question(QuestionKind::Code { test_cases: "{not json".to_string() }, 20);
        let outcome = engine.score(&q, &code_answer()).await;

        assert_eq!(outcome.score, 0);
        assert_eq!(outcome.feedback, "Evaluation error: invalid test cases format");
        assert_eq!(judge.call_count(), 0);
    }

    #[test]
    fn partial_score_clamps_out_of_range_rates() {
        assert_eq!(partial_score(10, 150.0), 10);
        assert_eq!(partial_score(10, -5.0), 0);
        assert_eq!(partial_score(10, f64::NAN), 0);
        assert_eq!(partial_score(7, 50.0), 3);
    }
}
