// src/handlers/groups.rs

use std::collections::BTreeSet;

use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use chrono::Utc;
use serde::Deserialize;
use sqlx::{PgConnection, PgPool, Row, postgres::PgRow};
use validator::Validate;

use crate::{
    error::AppError,
    models::{
        group::{CreateGroupRequest, GroupResponse, UpdateGroupRequest},
        user::StudentWithGroups,
    },
    utils::pagination::Page,
};

#[derive(Debug, Deserialize)]
pub struct ListParams {
    pub page: Option<i64>,
    pub limit: Option<i64>,
}

/// Dedupes `ids` and checks that every one names a student account.
/// Returns the deduped ids in ascending order.
pub(crate) async fn ensure_students(
    conn: &mut PgConnection,
    ids: &[i64],
) -> Result<Vec<i64>, AppError> {
    let wanted: Vec<i64> = ids.iter().copied().collect::<BTreeSet<_>>().into_iter().collect();
    if wanted.is_empty() {
        return Ok(wanted);
    }

    let found: Vec<i64> =
        sqlx::query_scalar("SELECT id FROM users WHERE role = 'student' AND id = ANY($1)")
            .bind(&wanted)
            .fetch_all(&mut *conn)
            .await?;

    if found.len() != wanted.len() {
        let known: BTreeSet<i64> = found.into_iter().collect();
        let missing: Vec<String> = wanted
            .iter()
            .filter(|id| !known.contains(id))
            .map(|id| id.to_string())
            .collect();
        return Err(AppError::BadRequest(format!(
            "Unknown student id(s): {}",
            missing.join(", ")
        )));
    }

    Ok(wanted)
}

fn group_from_row(row: &PgRow) -> Result<GroupResponse, sqlx::Error> {
    let student_ids: Vec<i64> = row.try_get("student_ids")?;
    Ok(GroupResponse {
        group_id: row.try_get("id")?,
        group_name: row.try_get("name")?,
        student_count: student_ids.len(),
        student_ids,
        updated_at: row.try_get("updated_at")?,
    })
}

const GROUP_SELECT: &str = r#"
    SELECT g.id, g.name, g.updated_at,
           COALESCE(array_agg(gs.user_id ORDER BY gs.user_id)
                    FILTER (WHERE gs.user_id IS NOT NULL), '{}') AS student_ids
    FROM student_groups g
    LEFT JOIN group_students gs ON gs.group_id = g.id
"#;

async fn load_group(conn: &mut PgConnection, id: i64) -> Result<GroupResponse, AppError> {
    let row = sqlx::query(&format!("{} WHERE g.id = $1 GROUP BY g.id", GROUP_SELECT))
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?
        .ok_or(AppError::NotFound(format!("Group {} not found", id)))?;
    Ok(group_from_row(&row)?)
}

/// Lists students, each with the ids of the groups it belongs to.
pub async fn list_students(
    State(pool): State<PgPool>,
    Query(params): Query<ListParams>,
) -> Result<impl IntoResponse, AppError> {
    let page = Page::new(params.page, params.limit);

    let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM users WHERE role = 'student'")
        .fetch_one(&pool)
        .await?;

    let rows = sqlx::query(
        r#"
        SELECT u.id, u.username, u.telephone, u.email, u.created_at,
               COALESCE(array_agg(gs.group_id ORDER BY gs.group_id)
                        FILTER (WHERE gs.group_id IS NOT NULL), '{}') AS group_ids
        FROM users u
        LEFT JOIN group_students gs ON gs.user_id = u.id
        WHERE u.role = 'student'
        GROUP BY u.id
        ORDER BY u.id
        LIMIT $1 OFFSET $2
        "#,
    )
    .bind(page.limit)
    .bind(page.offset())
    .fetch_all(&pool)
    .await
    .map_err(|e| {
        tracing::error!("Failed to list students: {:?}", e);
        AppError::InternalServerError(e.to_string())
    })?;

    let students = rows
        .iter()
        .map(|row| -> Result<StudentWithGroups, sqlx::Error> {
            Ok(StudentWithGroups {
                user_id: row.try_get("id")?,
                username: row.try_get("username")?,
                telephone: row.try_get("telephone")?,
                email: row.try_get("email")?,
                group_ids: row.try_get("group_ids")?,
                created_at: row.try_get("created_at")?,
            })
        })
        .collect::<Result<Vec<_>, sqlx::Error>>()?;

    Ok(Json(page.wrap(students, total)))
}

/// Creates a group with its initial members.
pub async fn create_group(
    State(pool): State<PgPool>,
    Json(payload): Json<CreateGroupRequest>,
) -> Result<impl IntoResponse, AppError> {
    if let Err(validation_errors) = payload.validate() {
        return Err(AppError::BadRequest(validation_errors.to_string()));
    }

    let mut tx = pool.begin().await?;
    let student_ids = ensure_students(&mut tx, &payload.student_ids).await?;

    let group_id: i64 =
        sqlx::query_scalar("INSERT INTO student_groups (name) VALUES ($1) RETURNING id")
            .bind(&payload.group_name)
            .fetch_one(&mut *tx)
            .await?;

    sqlx::query("INSERT INTO group_students (group_id, user_id) SELECT $1, UNNEST($2::BIGINT[])")
        .bind(group_id)
        .bind(&student_ids)
        .execute(&mut *tx)
        .await?;

    let group = load_group(&mut tx, group_id).await?;
    tx.commit().await?;

    tracing::info!("Created group {} with {} student(s)", group_id, group.student_count);

    Ok((StatusCode::CREATED, Json(group)))
}

pub async fn list_groups(
    State(pool): State<PgPool>,
    Query(params): Query<ListParams>,
) -> Result<impl IntoResponse, AppError> {
    let page = Page::new(params.page, params.limit);

    let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM student_groups")
        .fetch_one(&pool)
        .await?;

    let rows = sqlx::query(&format!(
        "{} GROUP BY g.id ORDER BY g.updated_at DESC, g.id DESC LIMIT $1 OFFSET $2",
        GROUP_SELECT
    ))
    .bind(page.limit)
    .bind(page.offset())
    .fetch_all(&pool)
    .await?;

    let groups = rows
        .iter()
        .map(group_from_row)
        .collect::<Result<Vec<_>, sqlx::Error>>()?;

    Ok(Json(page.wrap(groups, total)))
}

/// Renames a group and/or replaces its member list.
pub async fn update_group(
    State(pool): State<PgPool>,
    Path(group_id): Path<i64>,
    Json(payload): Json<UpdateGroupRequest>,
) -> Result<impl IntoResponse, AppError> {
    if let Err(validation_errors) = payload.validate() {
        return Err(AppError::BadRequest(validation_errors.to_string()));
    }
    if payload.group_name.is_none() && payload.student_ids.is_none() {
        return Err(AppError::BadRequest(
            "Provide group_name or student_ids".to_string(),
        ));
    }

    let mut tx = pool.begin().await?;

    let result = sqlx::query(
        "UPDATE student_groups SET name = COALESCE($2, name), updated_at = $3 WHERE id = $1",
    )
    .bind(group_id)
    .bind(&payload.group_name)
    .bind(Utc::now())
    .execute(&mut *tx)
    .await?;

    if result.rows_affected() == 0 {
        return Err(AppError::NotFound(format!("Group {} not found", group_id)));
    }

    if let Some(ids) = &payload.student_ids {
        let student_ids = ensure_students(&mut tx, ids).await?;

        sqlx::query("DELETE FROM group_students WHERE group_id = $1")
            .bind(group_id)
            .execute(&mut *tx)
            .await?;

        sqlx::query(
            "INSERT INTO group_students (group_id, user_id) SELECT $1, UNNEST($2::BIGINT[])",
        )
        .bind(group_id)
        .bind(&student_ids)
        .execute(&mut *tx)
        .await?;
    }

    let group = load_group(&mut tx, group_id).await?;
    tx.commit().await?;

    Ok(Json(group))
}

pub async fn delete_group(
    State(pool): State<PgPool>,
    Path(group_id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    // Memberships go with the group (ON DELETE CASCADE).
    let result = sqlx::query("DELETE FROM student_groups WHERE id = $1")
        .bind(group_id)
        .execute(&pool)
        .await
        .map_err(|e| {
            tracing::error!("Failed to delete group: {:?}", e);
            AppError::InternalServerError(e.to_string())
        })?;

    if result.rows_affected() == 0 {
        return Err(AppError::NotFound(format!("Group {} not found", group_id)));
    }

    Ok(StatusCode::NO_CONTENT)
}
