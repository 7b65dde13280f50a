// src/routes.rs

use axum::{
    Router,
    http::{HeaderValue, Method},
    middleware,
    routing::{get, post, put},
};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::{
    handlers::{auth, experiments, groups, notifications, student},
    state::AppState,
    utils::jwt::{auth_middleware, student_middleware, teacher_middleware},
};

/// Assembles the main application router.
///
/// * `/api/auth`: registration, login and the caller's profile.
/// * `/api/teacher`: students, groups, experiments, notifications (teacher only).
/// * `/api/student`: assigned experiments, answers, submissions (student only).
pub fn create_router(state: AppState) -> Router {
    let origins = [
        HeaderValue::from_static("http://localhost:3000"),
        HeaderValue::from_static("http://127.0.0.1:3000"),
    ];

    let cors = CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
        .allow_headers([
            axum::http::header::AUTHORIZATION,
            axum::http::header::CONTENT_TYPE,
        ]);

    let auth_routes = Router::new()
        .route("/register", post(auth::register))
        .route("/login", post(auth::login))
        .merge(
            Router::new()
                .route("/profile", get(auth::profile).put(auth::update_profile))
                .layer(middleware::from_fn_with_state(state.clone(), auth_middleware)),
        );

    let teacher_routes = Router::new()
        .route("/students", get(groups::list_students))
        .route("/groups", get(groups::list_groups).post(groups::create_group))
        .route(
            "/groups/{group_id}",
            put(groups::update_group).delete(groups::delete_group),
        )
        .route(
            "/experiments",
            get(experiments::list_experiments).post(experiments::create_experiment),
        )
        .route(
            "/experiments/{experiment_id}",
            get(experiments::get_experiment)
                .put(experiments::update_experiment)
                .delete(experiments::delete_experiment),
        )
        .route(
            "/experiments/{experiment_id}/students/{student_id}/submission",
            get(experiments::get_student_submission),
        )
        .route(
            "/notifications",
            get(notifications::list_notifications).post(notifications::create_notification),
        )
        // Auth runs first, then the role check
        .layer(middleware::from_fn(teacher_middleware))
        .layer(middleware::from_fn_with_state(state.clone(), auth_middleware));

    let student_routes = Router::new()
        .route("/experiments", get(student::list_experiments))
        .route("/experiments/{experiment_id}", get(student::get_experiment))
        .route("/experiments/{experiment_id}/save", post(student::save_answers))
        .route(
            "/experiments/{experiment_id}/submit",
            post(student::submit_experiment),
        )
        .route("/submissions", get(student::list_submissions))
        .route("/notifications", get(notifications::list_my_notifications))
        .layer(middleware::from_fn(student_middleware))
        .layer(middleware::from_fn_with_state(state.clone(), auth_middleware));

    Router::new()
        .nest("/api/auth", auth_routes)
        .nest("/api/teacher", teacher_routes)
        .nest("/api/student", student_routes)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}
