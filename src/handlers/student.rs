// src/handlers/student.rs

use std::collections::HashMap;

use axum::{
    Json,
    extract::{Path, Query, State, rejection::JsonRejection},
    response::IntoResponse,
};
use chrono::Utc;
use sqlx::{FromRow, PgPool, Postgres, QueryBuilder, Row};
use uuid::Uuid;

use crate::{
    error::AppError,
    grading::Grader,
    handlers::experiments::{experiment_questions, find_experiment, push_status_filter},
    models::{
        experiment::{
            EXPERIMENT_COLUMNS, Experiment, ExperimentListParams, StudentExperimentDetail,
            StudentExperimentSummary,
        },
        question::PublicQuestion,
        submission::{
            AnswerView, AnswersRequest, ExperimentSubmission, QUESTION_SUBMISSION_COLUMNS,
            QuestionSubmission, SUBMISSION_COLUMNS, SubmissionHistoryEntry, SubmissionListParams,
            SubmissionProgress, SubmissionResultLine, SubmissionStatus,
        },
    },
    utils::{jwt::CurrentUser, pagination::Page},
};

/// Experiments assigned to the caller, with where the caller stands on each.
pub async fn list_experiments(
    State(pool): State<PgPool>,
    user: CurrentUser,
    Query(params): Query<ExperimentListParams>,
) -> Result<impl IntoResponse, AppError> {
    let page = Page::new(params.page, params.limit);
    let now = Utc::now();

    let mut count: QueryBuilder<Postgres> = QueryBuilder::new(
        "SELECT COUNT(*) FROM experiments e \
         JOIN experiment_users eu ON eu.experiment_id = e.id WHERE eu.user_id = ",
    );
    count.push_bind(user.id);
    push_status_filter(&mut count, params.status, now);
    let total: i64 = count.build_query_scalar::<i64>().fetch_one(&pool).await?;

    let mut builder: QueryBuilder<Postgres> = QueryBuilder::new(
        "SELECT e.id, e.title, e.description, e.permission, e.deadline, e.created_at, e.updated_at, \
         (SELECT s.status FROM experiment_submissions s \
          WHERE s.experiment_id = e.id AND s.student_id = eu.user_id \
          ORDER BY s.created_at DESC LIMIT 1) AS latest_status \
         FROM experiments e JOIN experiment_users eu ON eu.experiment_id = e.id \
         WHERE eu.user_id = ",
    );
    builder.push_bind(user.id);
    push_status_filter(&mut builder, params.status, now);
    builder.push(" ORDER BY e.created_at DESC LIMIT ");
    builder.push_bind(page.limit);
    builder.push(" OFFSET ");
    builder.push_bind(page.offset());

    let rows = builder.build().fetch_all(&pool).await.map_err(|e| {
        tracing::error!("Failed to list experiments for student {}: {:?}", user.id, e);
        AppError::InternalServerError(e.to_string())
    })?;

    let mut experiments = Vec::with_capacity(rows.len());
    for row in &rows {
        let exp = Experiment::from_row(row)?;
        let latest: Option<String> = row.try_get("latest_status")?;
        let submission_status = match latest {
            Some(status) => status
                .parse::<SubmissionStatus>()
                .map(SubmissionProgress::from)
                .map_err(AppError::InternalServerError)?,
            None => SubmissionProgress::NotStarted,
        };

        experiments.push(StudentExperimentSummary {
            experiment_id: exp.id,
            status: exp.status(now),
            title: exp.title,
            description: exp.description,
            deadline: exp.deadline,
            submission_status,
        });
    }

    Ok(Json(page.wrap(experiments, total)))
}

/// Experiment questions for a student. Correct answers of choice/blank questions and
/// explanations appear only once the deadline has passed.
pub async fn get_experiment(
    State(pool): State<PgPool>,
    user: CurrentUser,
    Path(experiment_id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    let now = Utc::now();
    let mut conn = pool.acquire().await?;

    let experiment = find_experiment(&mut conn, experiment_id).await?;
    let questions = experiment_questions(&mut conn, experiment_id).await?;

    let latest = sqlx::query_as::<_, ExperimentSubmission>(&format!(
        "SELECT {} FROM experiment_submissions \
         WHERE experiment_id = $1 AND student_id = $2 ORDER BY created_at DESC LIMIT 1",
        SUBMISSION_COLUMNS
    ))
    .bind(experiment_id)
    .bind(user.id)
    .fetch_optional(&mut *conn)
    .await?;

    let answers = match &latest {
        Some(attempt) => sqlx::query_as::<_, QuestionSubmission>(&format!(
            "SELECT {} FROM question_submissions WHERE submission_id = $1 ORDER BY created_at",
            QUESTION_SUBMISSION_COLUMNS
        ))
        .bind(attempt.id)
        .fetch_all(&mut *conn)
        .await?
        .into_iter()
        .map(AnswerView::from)
        .collect(),
        None => vec![],
    };

    let reveal = experiment.is_expired(now);

    Ok(Json(StudentExperimentDetail {
        experiment_id: experiment.id,
        status: experiment.status(now),
        title: experiment.title,
        description: experiment.description,
        permission: experiment.permission,
        deadline: experiment.deadline,
        submission_status: latest
            .as_ref()
            .map(|a| SubmissionProgress::from(a.status))
            .unwrap_or(SubmissionProgress::NotStarted),
        total_score: latest.as_ref().map(|a| a.total_score).unwrap_or(0),
        questions: questions
            .iter()
            .map(|q| PublicQuestion::from_question(q, reveal))
            .collect(),
        answers,
    }))
}

/// Saves draft answers on the caller's open attempt.
pub async fn save_answers(
    State(grader): State<Grader>,
    user: CurrentUser,
    Path(experiment_id): Path<Uuid>,
    payload: Result<Json<AnswersRequest>, JsonRejection>,
) -> Result<impl IntoResponse, AppError> {
    let Json(payload) = payload?;
    let draft = grader
        .save_draft(experiment_id, user.id, &payload.answers)
        .await?;
    Ok(Json(draft))
}

/// Scores and closes the caller's open attempt.
pub async fn submit_experiment(
    State(grader): State<Grader>,
    user: CurrentUser,
    Path(experiment_id): Path<Uuid>,
    payload: Result<Json<AnswersRequest>, JsonRejection>,
) -> Result<impl IntoResponse, AppError> {
    let Json(payload) = payload?;
    let result = grader
        .finalize(experiment_id, user.id, &payload.answers)
        .await?;
    Ok(Json(result))
}

/// The caller's attempts, newest first, with per-question results.
pub async fn list_submissions(
    State(pool): State<PgPool>,
    user: CurrentUser,
    Query(params): Query<SubmissionListParams>,
) -> Result<impl IntoResponse, AppError> {
    let page = Page::new(params.page, params.limit);
    let now = Utc::now();

    let mut count: QueryBuilder<Postgres> =
        QueryBuilder::new("SELECT COUNT(*) FROM experiment_submissions WHERE student_id = ");
    count.push_bind(user.id);
    if let Some(experiment_id) = params.experiment_id {
        count.push(" AND experiment_id = ");
        count.push_bind(experiment_id);
    }
    let total: i64 = count.build_query_scalar::<i64>().fetch_one(&pool).await?;

    let mut builder: QueryBuilder<Postgres> = QueryBuilder::new(format!(
        "SELECT {} FROM experiment_submissions WHERE student_id = ",
        SUBMISSION_COLUMNS
    ));
    builder.push_bind(user.id);
    if let Some(experiment_id) = params.experiment_id {
        builder.push(" AND experiment_id = ");
        builder.push_bind(experiment_id);
    }
    builder.push(" ORDER BY submitted_at DESC LIMIT ");
    builder.push_bind(page.limit);
    builder.push(" OFFSET ");
    builder.push_bind(page.offset());

    let attempts = builder
        .build_query_as::<ExperimentSubmission>()
        .fetch_all(&pool)
        .await?;

    if attempts.is_empty() {
        return Ok(Json(page.wrap(Vec::<SubmissionHistoryEntry>::new(), total)));
    }

    let experiment_ids: Vec<Uuid> = attempts.iter().map(|a| a.experiment_id).collect();
    let experiments: HashMap<Uuid, Experiment> = sqlx::query_as::<_, Experiment>(&format!(
        "SELECT {} FROM experiments WHERE id = ANY($1)",
        EXPERIMENT_COLUMNS
    ))
    .bind(&experiment_ids)
    .fetch_all(&pool)
    .await?
    .into_iter()
    .map(|e| (e.id, e))
    .collect();

    let submission_ids: Vec<Uuid> = attempts.iter().map(|a| a.id).collect();
    let rows = sqlx::query(
        r#"
        SELECT qs.submission_id, qs.question_id, qs.type, qs.score, qs.feedback, q.explanation
        FROM question_submissions qs
        JOIN questions q ON q.id = qs.question_id
        WHERE qs.submission_id = ANY($1)
        ORDER BY q.position
        "#,
    )
    .bind(&submission_ids)
    .fetch_all(&pool)
    .await?;

    let mut results: HashMap<Uuid, Vec<(SubmissionResultLine, Option<String>)>> = HashMap::new();
    for row in &rows {
        let type_text: String = row.try_get("type")?;
        let line = SubmissionResultLine {
            question_id: row.try_get("question_id")?,
            question_type: type_text.parse().map_err(AppError::InternalServerError)?,
            score: row.try_get("score")?,
            feedback: row.try_get("feedback")?,
            explanation: None,
        };
        results
            .entry(row.try_get("submission_id")?)
            .or_default()
            .push((line, row.try_get("explanation")?));
    }

    let entries = attempts
        .into_iter()
        .map(|attempt| {
            let experiment = experiments.get(&attempt.experiment_id);
            let reveal = experiment.is_some_and(|e| e.is_expired(now));
            let lines = results
                .remove(&attempt.id)
                .unwrap_or_default()
                .into_iter()
                .map(|(mut line, explanation)| {
                    if reveal {
                        line.explanation = explanation;
                    }
                    line
                })
                .collect();

            SubmissionHistoryEntry {
                submission_id: attempt.id,
                experiment_id: attempt.experiment_id,
                experiment_title: experiment.map(|e| e.title.clone()).unwrap_or_default(),
                total_score: attempt.total_score,
                status: attempt.status,
                submitted_at: attempt.submitted_at,
                results: lines,
            }
        })
        .collect();

    Ok(Json(page.wrap(entries, total)))
}
