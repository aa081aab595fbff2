use std::{net::SocketAddr, sync::Arc};

use admission::ApiContext;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use shared::{
    domain::{CourseId, StudentId},
    error::{ApiError, ErrorCode},
    protocol::{CourseSummary, NewCourseRequest, StudentSchedule},
};
use storage::Storage;
use tower_http::limit::RequestBodyLimitLayer;
use tracing::{error, info};

mod config;

use config::{load_settings, prepare_database_url};

#[derive(Clone)]
struct AppState {
    api: ApiContext,
}

#[derive(Debug, Deserialize)]
struct LoginRequest {
    username: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct LoginResponse {
    student_id: i64,
}

#[derive(Debug, Deserialize)]
struct AdmissionRequest {
    student_id: i64,
}

#[derive(Debug, Serialize, Deserialize)]
struct CreateCourseResponse {
    course_id: i64,
}

#[derive(Debug, Deserialize)]
struct ScheduleQuery {
    student_id: i64,
}

const MAX_BODY_BYTES: usize = 16 * 1024;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt().with_env_filter("info").init();

    let settings = load_settings();
    let database_url = prepare_database_url(&settings.database_url);
    let storage = Storage::new(&database_url).await.map_err(|error| {
        error!(
            %database_url,
            %error,
            "failed to open SQLite database; verify parent directory exists and permissions are correct"
        );
        error
    })?;
    let api = ApiContext { storage };

    let state = AppState { api };
    let app = build_router(Arc::new(state));

    let addr: SocketAddr = settings.server_bind.parse()?;
    info!(%addr, "server listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/login", post(http_login))
        .route("/courses", get(http_list_courses).post(http_create_course))
        .route("/courses/:course_id/enroll", post(http_enroll))
        .route("/courses/:course_id/cancel", post(http_cancel))
        .route("/enrollments", get(http_student_schedule))
        .layer(RequestBodyLimitLayer::new(MAX_BODY_BYTES))
        .with_state(state)
}

async fn healthz() -> &'static str {
    "ok"
}

async fn http_login(
    State(state): State<Arc<AppState>>,
    Json(req): Json<LoginRequest>,
) -> Result<Json<LoginResponse>, (StatusCode, Json<ApiError>)> {
    let student_id = admission::login(&state.api, &req.username)
        .await
        .map_err(admission_error)?;
    Ok(Json(LoginResponse {
        student_id: student_id.0,
    }))
}

async fn http_list_courses(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<CourseSummary>>, (StatusCode, Json<ApiError>)> {
    let courses = admission::list_courses(&state.api)
        .await
        .map_err(admission_error)?;
    Ok(Json(courses))
}

async fn http_create_course(
    State(state): State<Arc<AppState>>,
    Json(req): Json<NewCourseRequest>,
) -> Result<impl IntoResponse, (StatusCode, Json<ApiError>)> {
    let course_id = admission::create_course(&state.api, &req)
        .await
        .map_err(admission_error)?;
    Ok((
        StatusCode::CREATED,
        Json(CreateCourseResponse {
            course_id: course_id.0,
        }),
    ))
}

async fn http_enroll(
    State(state): State<Arc<AppState>>,
    Path(course_id): Path<i64>,
    Json(req): Json<AdmissionRequest>,
) -> Result<impl IntoResponse, (StatusCode, Json<ApiError>)> {
    let (student_id, course_id) = validate_identities(req.student_id, course_id)?;
    let outcome = admission::enroll(&state.api, student_id, course_id)
        .await
        .map_err(admission_error)?;
    let status = match outcome {
        shared::protocol::EnrollOutcome::Enrolled => StatusCode::CREATED,
        shared::protocol::EnrollOutcome::Waitlisted { .. } => StatusCode::ACCEPTED,
    };
    Ok((status, Json(outcome)))
}

async fn http_cancel(
    State(state): State<Arc<AppState>>,
    Path(course_id): Path<i64>,
    Json(req): Json<AdmissionRequest>,
) -> Result<impl IntoResponse, (StatusCode, Json<ApiError>)> {
    let (student_id, course_id) = validate_identities(req.student_id, course_id)?;
    let outcome = admission::cancel(&state.api, student_id, course_id)
        .await
        .map_err(admission_error)?;
    Ok((StatusCode::OK, Json(outcome)))
}

async fn http_student_schedule(
    State(state): State<Arc<AppState>>,
    Query(q): Query<ScheduleQuery>,
) -> Result<Json<StudentSchedule>, (StatusCode, Json<ApiError>)> {
    if q.student_id <= 0 {
        return Err(authentication_required());
    }
    let schedule = admission::student_schedule(&state.api, StudentId(q.student_id))
        .await
        .map_err(admission_error)?;
    Ok(Json(schedule))
}

fn validate_identities(
    student_id: i64,
    course_id: i64,
) -> Result<(StudentId, CourseId), (StatusCode, Json<ApiError>)> {
    if student_id <= 0 {
        return Err(authentication_required());
    }
    if course_id <= 0 {
        return Err((
            StatusCode::BAD_REQUEST,
            Json(ApiError::new(ErrorCode::Validation, "course_id is required")),
        ));
    }
    Ok((StudentId(student_id), CourseId(course_id)))
}

fn authentication_required() -> (StatusCode, Json<ApiError>) {
    (
        StatusCode::UNAUTHORIZED,
        Json(ApiError::new(
            ErrorCode::Unauthorized,
            "authentication required",
        )),
    )
}

fn admission_error(err: shared::error::AdmissionError) -> (StatusCode, Json<ApiError>) {
    let api: ApiError = err.into();
    let status = match api.code {
        ErrorCode::Unauthorized => StatusCode::UNAUTHORIZED,
        ErrorCode::Validation => StatusCode::BAD_REQUEST,
        ErrorCode::NotFound | ErrorCode::NotFoundState => StatusCode::NOT_FOUND,
        ErrorCode::Conflict => StatusCode::CONFLICT,
        ErrorCode::Unavailable => StatusCode::SERVICE_UNAVAILABLE,
        ErrorCode::Internal => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, Json(api))
}

#[cfg(test)]
#[path = "tests/main_tests.rs"]
mod tests;
