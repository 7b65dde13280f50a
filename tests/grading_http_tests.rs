// tests/grading_http_tests.rs
//
// Drives the student answer routes through the full router (auth, role checks, JSON
// decoding, error mapping) with an in-memory submission store and a canned judge.

use std::sync::Arc;

use axum::{
    Router,
    body::{Body, to_bytes},
    http::{Request, StatusCode, header},
};
use chrono::{Duration, Utc};
use labwork::{
    config::Config,
    create_router,
    grading::{Grader, MemoryStore, StaticJudge},
    models::{
        experiment::Experiment,
        question::{Question, QuestionKind},
        submission::SubmissionStatus,
        user::Role,
    },
    state::AppState,
    utils::jwt::sign_jwt,
};
use serde_json::{Value, json};
use sqlx::postgres::PgPoolOptions;
use tower::ServiceExt;
use uuid::Uuid;

const SECRET: &str = "grading_http_test_secret";
const STUDENT_ID: i64 = 42;

struct TestApp {
    router: Router,
    store: MemoryStore,
    judge: Arc<StaticJudge>,
    experiment: Experiment,
    choice: Question,
    code: Question,
}

fn spawn_app(permission: i16, deadline_in: Duration) -> TestApp {
    let now = Utc::now();
    let experiment = Experiment {
        id: Uuid::new_v4(),
        title: "Sorting lab".to_string(),
        description: "Implement and reason about sorting".to_string(),
        permission,
        deadline: now + deadline_in,
        created_at: now,
        updated_at: now,
    };
    let choice = Question {
        id: Uuid::new_v4(),
        experiment_id: experiment.id,
        position: 0,
        content: "Which sort is stable?".to_string(),
        score: 10,
        kind: QuestionKind::Choice {
            options: vec!["Merge sort".to_string(), "Heap sort".to_string()],
            correct_answer: "Merge sort".to_string(),
        },
        image_url: None,
        explanation: None,
    };
    let code = Question {
        id: Uuid::new_v4(),
        experiment_id: experiment.id,
        position: 1,
        content: "Sort the input".to_string(),
        score: 30,
        kind: QuestionKind::Code {
            test_cases: r#"[{"input":"3 1 2","expected_output":"1 2 3"}]"#.to_string(),
        },
        image_url: None,
        explanation: None,
    };

    let store = MemoryStore::new();
    store.add_experiment(experiment.clone(), vec![choice.clone(), code.clone()]);
    let judge = Arc::new(StaticJudge::passing(1, 2));
    let grader = Grader::new(Arc::new(store.clone()), judge.clone());

    // Never connected: the routes under test only touch the grader.
    let pool = PgPoolOptions::new()
        .connect_lazy("postgres://localhost/labwork_unused")
        .expect("lazy pool");

    let config = Config {
        database_url: "postgres://localhost/labwork_unused".to_string(),
        jwt_secret: SECRET.to_string(),
        jwt_expiration: 600,
        rust_log: "error".to_string(),
        judge_url: "http://127.0.0.1:9".to_string(),
        port: 0,
        teacher_username: None,
        teacher_password: None,
    };

    let router = create_router(AppState {
        pool,
        config,
        grader,
    });

    TestApp {
        router,
        store,
        judge,
        experiment,
        choice,
        code,
    }
}

fn token(id: i64, role: Role) -> String {
    sign_jwt(id, role, SECRET, 600).unwrap()
}

async fn post_json(
    app: &TestApp,
    uri: &str,
    token: Option<&str>,
    body: Value,
) -> (StatusCode, Value) {
    let mut request = Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json");
    if let Some(token) = token {
        request = request.header(header::AUTHORIZATION, format!("Bearer {}", token));
    }
    let response = app
        .router
        .clone()
        .oneshot(request.body(Body::from(body.to_string())).unwrap())
        .await
        .unwrap();

    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };
    (status, value)
}

#[tokio::test]
async fn save_then_submit_scores_every_question() {
    let app = spawn_app(0, Duration::hours(1));
    let student = token(STUDENT_ID, Role::Student);
    let base = format!("/api/student/experiments/{}", app.experiment.id);

    let (status, draft) = post_json(
        &app,
        &format!("{}/save", base),
        Some(&student),
        json!({ "answers": [
            { "question_id": app.choice.id, "type": "choice", "answer": "Merge sort" }
        ]}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(draft["student_id"], STUDENT_ID);
    assert_eq!(draft["saved_questions"].as_array().unwrap().len(), 1);
    // Drafts are never sent to the judge.
    assert_eq!(app.judge.call_count(), 0);

    let (status, result) = post_json(
        &app,
        &format!("{}/submit", base),
        Some(&student),
        json!({ "answers": [
            { "question_id": app.choice.id, "type": "choice", "answer": "Merge sort" },
            { "question_id": app.code.id, "type": "code", "code": "print(1)", "language": "python" }
        ]}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    // 10 for the choice, half of 30 for the code question.
    assert_eq!(result["submission_id"], draft["submission_id"]);
    assert_eq!(result["total_score"], 25);
    assert_eq!(result["perfect_score"], 40);
    assert_eq!(result["results"].as_array().unwrap().len(), 2);
    assert_eq!(app.judge.call_count(), 1);

    let attempts = app.store.attempts(app.experiment.id, STUDENT_ID);
    assert_eq!(attempts.len(), 1);
    assert_eq!(attempts[0].status, SubmissionStatus::Submitted);
    assert_eq!(attempts[0].total_score, 25);
}

#[tokio::test]
async fn submit_after_deadline_is_rejected_without_late_permission() {
    let app = spawn_app(0, Duration::hours(-1));
    let student = token(STUDENT_ID, Role::Student);

    let (status, body) = post_json(
        &app,
        &format!("/api/student/experiments/{}/submit", app.experiment.id),
        Some(&student),
        json!({ "answers": [
            { "question_id": app.choice.id, "type": "choice", "answer": "Heap sort" }
        ]}),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "Experiment deadline has passed");
    assert!(app.store.attempts(app.experiment.id, STUDENT_ID).is_empty());
}

#[tokio::test]
async fn foreign_question_aborts_the_whole_batch() {
    let app = spawn_app(1, Duration::hours(1));
    let student = token(STUDENT_ID, Role::Student);

    let (status, _) = post_json(
        &app,
        &format!("/api/student/experiments/{}/save", app.experiment.id),
        Some(&student),
        json!({ "answers": [
            { "question_id": app.choice.id, "type": "choice", "answer": "Merge sort" },
            { "question_id": Uuid::new_v4(), "type": "blank", "answer": "x" }
        ]}),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    let attempts = app.store.attempts(app.experiment.id, STUDENT_ID);
    assert!(attempts.iter().all(|a| app.store.answers(a.id).is_empty()));
}

#[tokio::test]
async fn unknown_experiment_is_not_found() {
    let app = spawn_app(1, Duration::hours(1));
    let student = token(STUDENT_ID, Role::Student);

    let (status, _) = post_json(
        &app,
        &format!("/api/student/experiments/{}/submit", Uuid::new_v4()),
        Some(&student),
        json!({ "answers": [] }),
    )
    .await;

    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn teacher_token_cannot_use_student_routes() {
    let app = spawn_app(1, Duration::hours(1));
    let teacher = token(1, Role::Teacher);

    let (status, _) = post_json(
        &app,
        &format!("/api/student/experiments/{}/save", app.experiment.id),
        Some(&teacher),
        json!({ "answers": [
            { "question_id": app.choice.id, "type": "choice", "answer": "Merge sort" }
        ]}),
    )
    .await;

    assert_eq!(status, StatusCode::FORBIDDEN);
    assert!(app.store.attempts(app.experiment.id, 1).is_empty());
}

#[tokio::test]
async fn missing_or_forged_token_is_unauthorized() {
    let app = spawn_app(1, Duration::hours(1));
    let uri = format!("/api/student/experiments/{}/save", app.experiment.id);
    let body = json!({ "answers": [
        { "question_id": app.choice.id, "type": "choice", "answer": "Merge sort" }
    ]});

    let (status, _) = post_json(&app, &uri, None, body.clone()).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let forged = sign_jwt(STUDENT_ID, Role::Student, "some-other-secret", 600).unwrap();
    let (status, _) = post_json(&app, &uri, Some(&forged), body).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn malformed_answer_is_a_bad_request() {
    let app = spawn_app(1, Duration::hours(1));
    let student = token(STUDENT_ID, Role::Student);
    let base = format!("/api/student/experiments/{}", app.experiment.id);

    let unsupported_language = json!({ "answers": [
        { "question_id": app.code.id, "type": "code", "code": "fn main() {}", "language": "rust" }
    ]});
    let missing_answer = json!({ "answers": [
        { "question_id": app.choice.id, "type": "choice" }
    ]});

    for (route, body) in [("save", unsupported_language), ("submit", missing_answer)] {
        let (status, body) =
            post_json(&app, &format!("{}/{}", base, route), Some(&student), body).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].is_string());
    }

    assert!(app.store.attempts(app.experiment.id, STUDENT_ID).is_empty());
    assert_eq!(app.judge.call_count(), 0);
}
