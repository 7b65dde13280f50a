// src/handlers/notifications.rs

use axum::{
    Json,
    extract::{Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use chrono::Utc;
use serde_json::json;
use sqlx::{PgPool, Postgres, QueryBuilder};
use uuid::Uuid;
use validator::Validate;

use crate::{
    error::AppError,
    handlers::groups::ensure_students,
    models::notification::{CreateNotificationRequest, Notification, NotificationListParams},
    utils::{
        html::clean_html,
        jwt::CurrentUser,
        pagination::{Page, Paginated},
    },
};

/// Publishes a notification to the listed students. Content is sanitized.
pub async fn create_notification(
    State(pool): State<PgPool>,
    Json(payload): Json<CreateNotificationRequest>,
) -> Result<impl IntoResponse, AppError> {
    if let Err(validation_errors) = payload.validate() {
        return Err(AppError::BadRequest(validation_errors.to_string()));
    }

    let mut tx = pool.begin().await?;
    let recipients = ensure_students(&mut tx, &payload.users).await?;

    if let Some(experiment_id) = payload.experiment_id {
        let exists: Option<Uuid> = sqlx::query_scalar("SELECT id FROM experiments WHERE id = $1")
            .bind(experiment_id)
            .fetch_optional(&mut *tx)
            .await?;
        if exists.is_none() {
            return Err(AppError::NotFound(format!("Experiment {} not found", experiment_id)));
        }
    }

    let id = Uuid::new_v4();
    let created_at = Utc::now();
    sqlx::query(
        r#"
        INSERT INTO notifications (id, title, content, experiment_id, is_important, created_at)
        VALUES ($1, $2, $3, $4, $5, $6)
        "#,
    )
    .bind(id)
    .bind(&payload.title)
    .bind(clean_html(&payload.content))
    .bind(payload.experiment_id)
    .bind(payload.is_important)
    .bind(created_at)
    .execute(&mut *tx)
    .await
    .map_err(|e| {
        tracing::error!("Failed to create notification: {:?}", e);
        AppError::InternalServerError(e.to_string())
    })?;

    sqlx::query(
        "INSERT INTO notification_users (notification_id, user_id) SELECT $1, UNNEST($2::BIGINT[])",
    )
    .bind(id)
    .bind(&recipients)
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;

    Ok((
        StatusCode::CREATED,
        Json(json!({
            "id": id,
            "recipients": recipients.len(),
            "created_at": created_at,
        })),
    ))
}

/// Appends the optional list filters. `builder` must already end inside a WHERE clause.
fn push_filters(builder: &mut QueryBuilder<'_, Postgres>, params: &NotificationListParams) {
    if let Some(experiment_id) = params.experiment_id {
        builder.push(" AND n.experiment_id = ");
        builder.push_bind(experiment_id);
    }
    if let Some(is_important) = params.is_important {
        builder.push(" AND n.is_important = ");
        builder.push_bind(is_important);
    }
    if let Some(created_after) = params.created_after {
        builder.push(" AND n.created_at >= ");
        builder.push_bind(created_after);
    }
}

fn push_recipient(builder: &mut QueryBuilder<'_, Postgres>, recipient: Option<i64>) {
    if let Some(user_id) = recipient {
        builder.push(
            " AND EXISTS (SELECT 1 FROM notification_users nu \
             WHERE nu.notification_id = n.id AND nu.user_id = ",
        );
        builder.push_bind(user_id);
        builder.push(")");
    }
}

/// Runs a filtered, paginated notification query. `recipient` restricts it to one user.
async fn query_notifications(
    pool: &PgPool,
    params: &NotificationListParams,
    recipient: Option<i64>,
) -> Result<Json<Paginated<Notification>>, AppError> {
    let page = Page::new(params.page, params.limit);

    let mut count: QueryBuilder<Postgres> =
        QueryBuilder::new("SELECT COUNT(*) FROM notifications n WHERE TRUE");
    push_recipient(&mut count, recipient);
    push_filters(&mut count, params);
    let total: i64 = count.build_query_scalar::<i64>().fetch_one(pool).await?;

    let mut builder: QueryBuilder<Postgres> = QueryBuilder::new(
        "SELECT n.id, n.title, n.content, n.experiment_id, n.is_important, n.created_at \
         FROM notifications n WHERE TRUE",
    );
    push_recipient(&mut builder, recipient);
    push_filters(&mut builder, params);
    builder.push(" ORDER BY n.created_at DESC LIMIT ");
    builder.push_bind(page.limit);
    builder.push(" OFFSET ");
    builder.push_bind(page.offset());

    let notifications = builder
        .build_query_as::<Notification>()
        .fetch_all(pool)
        .await
        .map_err(|e| {
            tracing::error!("Failed to list notifications: {:?}", e);
            AppError::InternalServerError(e.to_string())
        })?;

    Ok(Json(page.wrap(notifications, total)))
}

/// All notifications, for teachers.
pub async fn list_notifications(
    State(pool): State<PgPool>,
    Query(params): Query<NotificationListParams>,
) -> Result<impl IntoResponse, AppError> {
    query_notifications(&pool, &params, None).await
}

/// Notifications addressed to the calling student.
pub async fn list_my_notifications(
    State(pool): State<PgPool>,
    user: CurrentUser,
    Query(params): Query<NotificationListParams>,
) -> Result<impl IntoResponse, AppError> {
    query_notifications(&pool, &params, Some(user.id)).await
}
