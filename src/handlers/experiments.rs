// src/handlers/experiments.rs

use std::collections::BTreeSet;

use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use chrono::{DateTime, Utc};
use serde_json::json;
use sqlx::{PgConnection, PgPool, Postgres, QueryBuilder};
use uuid::Uuid;
use validator::Validate;

use crate::{
    error::AppError,
    handlers::groups::ensure_students,
    models::{
        experiment::{
            CreateExperimentRequest, EXPERIMENT_COLUMNS, Experiment, ExperimentListParams,
            ExperimentSummary, StatusFilter, TeacherExperimentDetail, UpdateExperimentRequest,
        },
        question::{QUESTION_COLUMNS, Question, QuestionInput, TeacherQuestion},
        submission::{
            AnswerView, ExperimentSubmission, QUESTION_SUBMISSION_COLUMNS, QuestionSubmission,
            SUBMISSION_COLUMNS, StudentSubmissionView, SubmissionProgress,
        },
    },
    utils::{html::clean_html, jwt::CurrentUser, pagination::Page},
};

pub(crate) async fn find_experiment(
    conn: &mut PgConnection,
    id: Uuid,
) -> Result<Experiment, AppError> {
    sqlx::query_as::<_, Experiment>(&format!(
        "SELECT {} FROM experiments WHERE id = $1",
        EXPERIMENT_COLUMNS
    ))
    .bind(id)
    .fetch_optional(&mut *conn)
    .await?
    .ok_or_else(|| AppError::NotFound(format!("Experiment {} not found", id)))
}

pub(crate) async fn experiment_questions(
    conn: &mut PgConnection,
    experiment_id: Uuid,
) -> Result<Vec<Question>, AppError> {
    let questions = sqlx::query_as::<_, Question>(&format!(
        "SELECT {} FROM questions WHERE experiment_id = $1 ORDER BY position, created_at",
        QUESTION_COLUMNS
    ))
    .bind(experiment_id)
    .fetch_all(&mut *conn)
    .await?;
    Ok(questions)
}

/// Checks the type-specific fields of a question and inserts it.
async fn insert_question(
    conn: &mut PgConnection,
    experiment_id: Uuid,
    position: i32,
    input: QuestionInput,
) -> Result<Uuid, AppError> {
    input.spec.check()?;
    let cols = input.spec.into_columns()?;
    let id = Uuid::new_v4();

    sqlx::query(
        r#"
        INSERT INTO questions
            (id, experiment_id, position, type, content, options, correct_answer,
             test_cases, score, image_url, explanation)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
        "#,
    )
    .bind(id)
    .bind(experiment_id)
    .bind(position)
    .bind(cols.question_type.as_str())
    .bind(&input.content)
    .bind(cols.options)
    .bind(cols.correct_answer)
    .bind(cols.test_cases)
    .bind(input.score)
    .bind(input.image_url)
    .bind(input.explanation)
    .execute(&mut *conn)
    .await?;

    Ok(id)
}

async fn rewrite_question(
    conn: &mut PgConnection,
    id: Uuid,
    input: QuestionInput,
    now: DateTime<Utc>,
) -> Result<(), AppError> {
    input.validate()?;
    input.spec.check()?;
    let cols = input.spec.into_columns()?;

    sqlx::query(
        r#"
        UPDATE questions
        SET type = $2, content = $3, options = $4, correct_answer = $5, test_cases = $6,
            score = $7, image_url = $8, explanation = $9, updated_at = $10
        WHERE id = $1
        "#,
    )
    .bind(id)
    .bind(cols.question_type.as_str())
    .bind(&input.content)
    .bind(cols.options)
    .bind(cols.correct_answer)
    .bind(cols.test_cases)
    .bind(input.score)
    .bind(input.image_url)
    .bind(input.explanation)
    .bind(now)
    .execute(&mut *conn)
    .await?;

    Ok(())
}

/// Students assigned to an experiment.
async fn assigned_students(
    conn: &mut PgConnection,
    experiment_id: Uuid,
) -> Result<Vec<i64>, AppError> {
    let ids = sqlx::query_scalar(
        "SELECT user_id FROM experiment_users WHERE experiment_id = $1 ORDER BY user_id",
    )
    .bind(experiment_id)
    .fetch_all(&mut *conn)
    .await?;
    Ok(ids)
}

/// Union of `student_ids` and the members of `group_ids`. Unknown groups are rejected.
async fn resolve_assignees(
    conn: &mut PgConnection,
    student_ids: &[i64],
    group_ids: &[i64],
) -> Result<Vec<i64>, AppError> {
    let mut ids: BTreeSet<i64> = student_ids.iter().copied().collect();

    if !group_ids.is_empty() {
        let wanted: BTreeSet<i64> = group_ids.iter().copied().collect();
        let wanted: Vec<i64> = wanted.into_iter().collect();

        let found: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM student_groups WHERE id = ANY($1)")
                .bind(&wanted)
                .fetch_one(&mut *conn)
                .await?;
        if found != wanted.len() as i64 {
            return Err(AppError::BadRequest("Unknown group id in group_ids".to_string()));
        }

        let members: Vec<i64> = sqlx::query_scalar(
            "SELECT DISTINCT user_id FROM group_students WHERE group_id = ANY($1)",
        )
        .bind(&wanted)
        .fetch_all(&mut *conn)
        .await?;
        ids.extend(members);
    }

    let ids: Vec<i64> = ids.into_iter().collect();
    ensure_students(conn, &ids).await
}

async fn load_detail(
    conn: &mut PgConnection,
    id: Uuid,
) -> Result<TeacherExperimentDetail, AppError> {
    let experiment = find_experiment(conn, id).await?;
    let questions = experiment_questions(conn, id).await?;
    let student_ids = assigned_students(conn, id).await?;

    Ok(TeacherExperimentDetail {
        experiment_id: experiment.id,
        title: experiment.title,
        description: experiment.description,
        permission: experiment.permission,
        deadline: experiment.deadline,
        student_ids,
        questions: questions.iter().map(TeacherQuestion::from).collect(),
        created_at: experiment.created_at,
    })
}

/// Creates an experiment with its questions, assigns it and notifies the assigned students.
pub async fn create_experiment(
    State(pool): State<PgPool>,
    user: CurrentUser,
    Json(payload): Json<CreateExperimentRequest>,
) -> Result<impl IntoResponse, AppError> {
    if let Err(validation_errors) = payload.validate() {
        return Err(AppError::BadRequest(validation_errors.to_string()));
    }

    let now = Utc::now();
    if payload.deadline <= now {
        return Err(AppError::BadRequest("Deadline must be in the future".to_string()));
    }
    payload.check_questions()?;

    let mut tx = pool.begin().await?;
    let assignees = resolve_assignees(&mut tx, &payload.student_ids, &payload.group_ids).await?;

    let experiment_id = Uuid::new_v4();
    sqlx::query(
        r#"
        INSERT INTO experiments (id, title, description, permission, deadline, created_at, updated_at)
        VALUES ($1, $2, $3, $4, $5, $6, $6)
        "#,
    )
    .bind(experiment_id)
    .bind(&payload.title)
    .bind(clean_html(&payload.description))
    .bind(payload.permission)
    .bind(payload.deadline)
    .bind(now)
    .execute(&mut *tx)
    .await
    .map_err(|e| {
        tracing::error!("Failed to create experiment: {:?}", e);
        AppError::InternalServerError(e.to_string())
    })?;

    for (position, question) in payload.questions.into_iter().enumerate() {
        insert_question(&mut tx, experiment_id, position as i32, question).await?;
    }

    if !assignees.is_empty() {
        sqlx::query(
            "INSERT INTO experiment_users (experiment_id, user_id) SELECT $1, UNNEST($2::BIGINT[])",
        )
        .bind(experiment_id)
        .bind(&assignees)
        .execute(&mut *tx)
        .await?;

        let notification_id = Uuid::new_v4();
        sqlx::query(
            r#"
            INSERT INTO notifications (id, title, content, experiment_id, is_important, created_at)
            VALUES ($1, $2, $3, $4, FALSE, $5)
            "#,
        )
        .bind(notification_id)
        .bind(format!("New experiment: {}", payload.title))
        .bind(format!(
            "You have a new experiment \"{}\". Please submit before {}.",
            payload.title,
            payload.deadline.format("%Y-%m-%d %H:%M")
        ))
        .bind(experiment_id)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            "INSERT INTO notification_users (notification_id, user_id) SELECT $1, UNNEST($2::BIGINT[])",
        )
        .bind(notification_id)
        .bind(&assignees)
        .execute(&mut *tx)
        .await?;
    }

    tx.commit().await?;

    tracing::info!(
        "Teacher {} created experiment {} for {} student(s)",
        user.id,
        experiment_id,
        assignees.len()
    );

    Ok((
        StatusCode::CREATED,
        Json(json!({
            "experiment_id": experiment_id,
            "title": payload.title,
            "created_at": now,
        })),
    ))
}

pub(crate) fn push_status_filter(
    builder: &mut QueryBuilder<'_, Postgres>,
    status: StatusFilter,
    now: DateTime<Utc>,
) {
    match status {
        StatusFilter::All => {}
        StatusFilter::Active => {
            builder.push(" AND deadline > ");
            builder.push_bind(now);
        }
        StatusFilter::Expired => {
            builder.push(" AND deadline <= ");
            builder.push_bind(now);
        }
    }
}

pub async fn list_experiments(
    State(pool): State<PgPool>,
    Query(params): Query<ExperimentListParams>,
) -> Result<impl IntoResponse, AppError> {
    let page = Page::new(params.page, params.limit);
    let now = Utc::now();

    let mut count: QueryBuilder<Postgres> =
        QueryBuilder::new("SELECT COUNT(*) FROM experiments WHERE TRUE");
    push_status_filter(&mut count, params.status, now);
    let total: i64 = count.build_query_scalar::<i64>().fetch_one(&pool).await?;

    let mut builder: QueryBuilder<Postgres> = QueryBuilder::new(format!(
        "SELECT {} FROM experiments WHERE TRUE",
        EXPERIMENT_COLUMNS
    ));
    push_status_filter(&mut builder, params.status, now);
    builder.push(" ORDER BY created_at DESC LIMIT ");
    builder.push_bind(page.limit);
    builder.push(" OFFSET ");
    builder.push_bind(page.offset());

    let experiments = builder
        .build_query_as::<Experiment>()
        .fetch_all(&pool)
        .await
        .map_err(|e| {
            tracing::error!("Failed to list experiments: {:?}", e);
            AppError::InternalServerError(e.to_string())
        })?;

    let rows: Vec<ExperimentSummary> = experiments
        .into_iter()
        .map(|exp| ExperimentSummary {
            experiment_id: exp.id,
            status: exp.status(now),
            title: exp.title,
            deadline: exp.deadline,
            created_at: exp.created_at,
        })
        .collect();

    Ok(Json(page.wrap(rows, total)))
}

pub async fn get_experiment(
    State(pool): State<PgPool>,
    Path(experiment_id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    let mut conn = pool.acquire().await?;
    let detail = load_detail(&mut conn, experiment_id).await?;
    Ok(Json(detail))
}

/// Updates experiment fields, edits/appends questions and removes questions, atomically.
pub async fn update_experiment(
    State(pool): State<PgPool>,
    Path(experiment_id): Path<Uuid>,
    Json(payload): Json<UpdateExperimentRequest>,
) -> Result<impl IntoResponse, AppError> {
    if let Err(validation_errors) = payload.validate() {
        return Err(AppError::BadRequest(validation_errors.to_string()));
    }

    let now = Utc::now();
    if payload.deadline.is_some_and(|d| d <= now) {
        return Err(AppError::BadRequest("Deadline must be in the future".to_string()));
    }

    let mut tx = pool.begin().await?;

    sqlx::query("SELECT id FROM experiments WHERE id = $1 FOR UPDATE")
        .bind(experiment_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Experiment {} not found", experiment_id)))?;

    let mut builder: QueryBuilder<Postgres> =
        QueryBuilder::new("UPDATE experiments SET updated_at = ");
    builder.push_bind(now);

    if let Some(title) = payload.title {
        builder.push(", title = ");
        builder.push_bind(title);
    }

    if let Some(description) = payload.description {
        builder.push(", description = ");
        builder.push_bind(clean_html(&description));
    }

    if let Some(deadline) = payload.deadline {
        builder.push(", deadline = ");
        builder.push_bind(deadline);
    }

    if let Some(permission) = payload.permission {
        builder.push(", permission = ");
        builder.push_bind(permission);
    }

    builder.push(" WHERE id = ");
    builder.push_bind(experiment_id);
    builder.build().execute(&mut *tx).await?;

    if !payload.remove_questions.is_empty() {
        // Question submissions go with their question (ON DELETE CASCADE).
        let removed =
            sqlx::query("DELETE FROM questions WHERE experiment_id = $1 AND id = ANY($2)")
                .bind(experiment_id)
                .bind(&payload.remove_questions)
                .execute(&mut *tx)
                .await?;

        let wanted: BTreeSet<Uuid> = payload.remove_questions.iter().copied().collect();
        if removed.rows_affected() != wanted.len() as u64 {
            return Err(AppError::NotFound(
                "remove_questions names a question outside this experiment".to_string(),
            ));
        }
    }

    let existing = experiment_questions(&mut tx, experiment_id).await?;
    let mut next_position = existing.iter().map(|q| q.position + 1).max().unwrap_or(0);

    for entry in payload.questions {
        match entry.question_id {
            Some(question_id) => {
                let current = existing
                    .iter()
                    .find(|q| q.id == question_id)
                    .ok_or_else(|| {
                        AppError::NotFound(format!("Question {} not found", question_id))
                    })?;
                let merged = entry.merge_into(current)?;
                rewrite_question(&mut tx, question_id, merged, now).await?;
            }
            None => {
                let input = entry.into_new_question()?;
                input.validate()?;
                insert_question(&mut tx, experiment_id, next_position, input).await?;
                next_position += 1;
            }
        }
    }

    let detail = load_detail(&mut tx, experiment_id).await?;
    tx.commit().await?;

    tracing::info!("Experiment {} updated", experiment_id);

    Ok(Json(detail))
}

pub async fn delete_experiment(
    State(pool): State<PgPool>,
    Path(experiment_id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    // Assignments, questions, submissions cascade; notifications keep a NULL experiment link.
    let result = sqlx::query("DELETE FROM experiments WHERE id = $1")
        .bind(experiment_id)
        .execute(&pool)
        .await
        .map_err(|e| {
            tracing::error!("Failed to delete experiment: {:?}", e);
            AppError::InternalServerError(e.to_string())
        })?;

    if result.rows_affected() == 0 {
        return Err(AppError::NotFound(format!("Experiment {} not found", experiment_id)));
    }

    tracing::info!("Experiment {} deleted", experiment_id);

    Ok(StatusCode::NO_CONTENT)
}

/// One student's progress on an experiment. For submitted work, the latest submitted
/// attempt with its graded answers.
pub async fn get_student_submission(
    State(pool): State<PgPool>,
    Path((experiment_id, student_id)): Path<(Uuid, i64)>,
) -> Result<impl IntoResponse, AppError> {
    let mut conn = pool.acquire().await?;
    find_experiment(&mut conn, experiment_id).await?;

    let submitted = sqlx::query_as::<_, ExperimentSubmission>(&format!(
        "SELECT {} FROM experiment_submissions \
         WHERE experiment_id = $1 AND student_id = $2 AND status = 'submitted' \
         ORDER BY submitted_at DESC LIMIT 1",
        SUBMISSION_COLUMNS
    ))
    .bind(experiment_id)
    .bind(student_id)
    .fetch_optional(&mut *conn)
    .await?;

    let Some(attempt) = submitted else {
        let open: Option<Uuid> = sqlx::query_scalar(
            "SELECT id FROM experiment_submissions \
             WHERE experiment_id = $1 AND student_id = $2 AND status = 'in_progress'",
        )
        .bind(experiment_id)
        .bind(student_id)
        .fetch_optional(&mut *conn)
        .await?;

        return Ok(Json(StudentSubmissionView {
            experiment_id,
            student_id,
            status: if open.is_some() {
                SubmissionProgress::InProgress
            } else {
                SubmissionProgress::NotStarted
            },
            submission_id: open,
            total_score: None,
            submitted_at: None,
            answers: vec![],
        }));
    };

    let answers = sqlx::query_as::<_, QuestionSubmission>(&format!(
        "SELECT {} FROM question_submissions WHERE submission_id = $1 ORDER BY created_at",
        QUESTION_SUBMISSION_COLUMNS
    ))
    .bind(attempt.id)
    .fetch_all(&mut *conn)
    .await?;

    Ok(Json(StudentSubmissionView {
        experiment_id,
        student_id,
        status: SubmissionProgress::Submitted,
        submission_id: Some(attempt.id),
        total_score: Some(attempt.total_score),
        submitted_at: Some(attempt.submitted_at),
        answers: answers.into_iter().map(AnswerView::from).collect(),
    }))
}
