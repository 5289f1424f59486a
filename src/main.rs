// src/main.rs
use anyhow::{Context, Result};
use axum::extract::{FromRequestParts, Path as UrlPath, Query, State};
use axum::http::{request::Parts, HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::NaiveDate;
use clap::Parser;
use dotenv::dotenv;
use serde::Deserialize;
use std::{
    env, fs,
    net::SocketAddr,
    path::{Path, PathBuf},
    sync::Arc,
};
use thiserror::Error;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

mod hours;
mod roster;
mod schedule;
mod store;
mod wchr;


use roster::ShiftGrid;
use schedule::{
    Actor, ReviewAction, Role, Schedule, ScheduleDraft, ScheduleError, ScheduleQuery,
    ScheduleService,
};
use store::{
    AirlineBudget, BudgetStore, Clock, Employee, EmployeeDirectory, InMemoryBudgetStore,
    InMemoryDirectory, InMemoryFlightStore, InMemoryReportStore, InMemoryScheduleStore,
    StoreError, SystemClock,
};
use wchr::{
    FlightBoardEntry, FlightClosure, ReportSubmission, WchrError, WchrFlight, WchrReport,
    WchrService,
};

// --- Configuration ---

const DEFAULT_BIND: ([u8; 4], u16) = ([127, 0, 0, 1], 8205);

#[derive(Parser, Debug)]
#[command(
    name = "rampdesk-core",
    about = "Weekly shift scheduling and WCHR report tracking for airport ground operations"
)]
struct Cli {
    /// Socket address to listen on (falls back to RAMPDESK_BIND).
    #[arg(long)]
    bind: Option<SocketAddr>,
    /// JSON seed file for the employee directory
    /// (falls back to RAMPDESK_EMPLOYEES_FILE).
    #[arg(long)]
    employees_file: Option<PathBuf>,
    /// JSON seed file for airline weekly-hour budgets
    /// (falls back to RAMPDESK_BUDGETS_FILE).
    #[arg(long)]
    budgets_file: Option<PathBuf>,
}

fn env_path(var: &str) -> Option<PathBuf> {
    env::var(var).ok().map(PathBuf::from)
}

fn load_seed<T: serde::de::DeserializeOwned>(path: &Path, what: &str) -> Result<Vec<T>> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("reading {} seed file {}", what, path.display()))?;
    serde_json::from_str(&raw)
        .with_context(|| format!("parsing {} seed file {}", what, path.display()))
}

// --- Error handling ---

#[derive(Error, Debug)]
pub enum AppError {
    #[error("bad request: {0}")]
    BadRequest(String),
    #[error(transparent)]
    Schedule(#[from] ScheduleError),
    #[error(transparent)]
    Wchr(#[from] WchrError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

fn schedule_status(err: &ScheduleError) -> StatusCode {
    match err {
        ScheduleError::NotAuthorized { .. } | ScheduleError::NotCreator => StatusCode::FORBIDDEN,
        ScheduleError::NotFound { .. } => StatusCode::NOT_FOUND,
        ScheduleError::InvalidTransition { .. } => StatusCode::CONFLICT,
        ScheduleError::Store(store_err) => store_status(store_err),
        _ => StatusCode::UNPROCESSABLE_ENTITY,
    }
}

fn wchr_status(err: &WchrError) -> StatusCode {
    match err {
        WchrError::NotAuthorized { .. } => StatusCode::FORBIDDEN,
        WchrError::FlightNotFound { .. } => StatusCode::NOT_FOUND,
        WchrError::Store(store_err) => store_status(store_err),
    }
}

fn store_status(err: &StoreError) -> StatusCode {
    match err {
        StoreError::DocumentNotFound { .. } => StatusCode::NOT_FOUND,
        StoreError::Backend(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let status = match &self {
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::Schedule(err) => schedule_status(err),
            AppError::Wchr(err) => wchr_status(err),
            AppError::Store(err) => store_status(err),
        };
        if status.is_server_error() {
            error!("Request failed: {}", self);
        } else {
            warn!("Request rejected ({}): {}", status, self);
        }
        let body = Json(serde_json::json!({ "error": self.to_string() }));
        (status, body).into_response()
    }
}

// --- Actor extraction ---

// The session collaborator is out of scope; upstream auth is trusted to
// put the current actor into these headers.
const ACTOR_ID_HEADER: &str = "x-actor-id";
const ACTOR_NAME_HEADER: &str = "x-actor-name";
const ACTOR_ROLE_HEADER: &str = "x-actor-role";

fn required_header(headers: &HeaderMap, name: &str) -> Result<String, AppError> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .ok_or_else(|| AppError::BadRequest(format!("missing {} header", name)))
}

impl<S> FromRequestParts<S> for Actor
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let id = required_header(&parts.headers, ACTOR_ID_HEADER)?;
        let username = required_header(&parts.headers, ACTOR_NAME_HEADER)?;
        let role = Role::parse(&required_header(&parts.headers, ACTOR_ROLE_HEADER)?);
        Ok(Actor { id, username, role })
    }
}

// --- Application state ---

#[derive(Clone)]
struct AppState {
    directory: Arc<dyn EmployeeDirectory>,
    schedules: Arc<ScheduleService>,
    wchr: Arc<WchrService>,
}

// --- Handlers ---

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

async fn list_employees(
    State(state): State<AppState>,
    _actor: Actor,
) -> Result<Json<Vec<Employee>>, AppError> {
    Ok(Json(state.directory.list_active_employees().await?))
}

async fn submit_schedule(
    State(state): State<AppState>,
    actor: Actor,
    Json(draft): Json<ScheduleDraft>,
) -> Result<(StatusCode, Json<Schedule>), AppError> {
    let schedule = state.schedules.submit(&actor, draft).await?;
    Ok((StatusCode::CREATED, Json(schedule)))
}

async fn save_draft_schedule(
    State(state): State<AppState>,
    actor: Actor,
    Json(draft): Json<ScheduleDraft>,
) -> Result<(StatusCode, Json<Schedule>), AppError> {
    let schedule = state.schedules.save_draft(&actor, draft).await?;
    Ok((StatusCode::CREATED, Json(schedule)))
}

async fn list_schedules(
    State(state): State<AppState>,
    actor: Actor,
    Query(query): Query<ScheduleQuery>,
) -> Result<Json<Vec<Schedule>>, AppError> {
    Ok(Json(state.schedules.list_for(&actor, query).await?))
}

async fn get_schedule(
    State(state): State<AppState>,
    actor: Actor,
    UrlPath(id): UrlPath<String>,
) -> Result<Json<Schedule>, AppError> {
    Ok(Json(state.schedules.get_for(&actor, &id).await?))
}

async fn review_schedule(
    State(state): State<AppState>,
    actor: Actor,
    UrlPath(id): UrlPath<String>,
    Json(action): Json<ReviewAction>,
) -> Result<Json<Schedule>, AppError> {
    Ok(Json(state.schedules.review(&actor, &id, action).await?))
}

#[derive(Debug, Deserialize)]
struct ResubmitRequest {
    /// Edited grid for the new cycle; omitted means resubmit as-is.
    #[serde(default)]
    grid: Option<ShiftGrid>,
}

async fn resubmit_schedule(
    State(state): State<AppState>,
    actor: Actor,
    UrlPath(id): UrlPath<String>,
    Json(request): Json<ResubmitRequest>,
) -> Result<(StatusCode, Json<Schedule>), AppError> {
    let schedule = state.schedules.resubmit(&actor, &id, request.grid).await?;
    Ok((StatusCode::CREATED, Json(schedule)))
}

async fn close_flight(
    State(state): State<AppState>,
    actor: Actor,
    Json(request): Json<FlightClosure>,
) -> Result<Json<WchrFlight>, AppError> {
    Ok(Json(state.wchr.close_flight(&actor, request).await?))
}

async fn get_flight(
    State(state): State<AppState>,
    _actor: Actor,
    UrlPath(flight_key): UrlPath<String>,
) -> Result<Json<WchrFlight>, AppError> {
    Ok(Json(state.wchr.get_flight(&flight_key).await?))
}

#[derive(Debug, Deserialize)]
struct DayQuery {
    date: NaiveDate,
}

async fn day_flight_board(
    State(state): State<AppState>,
    _actor: Actor,
    Query(query): Query<DayQuery>,
) -> Result<Json<Vec<FlightBoardEntry>>, AppError> {
    Ok(Json(state.wchr.day_board(query.date).await?))
}

async fn submit_report(
    State(state): State<AppState>,
    actor: Actor,
    Json(submission): Json<ReportSubmission>,
) -> Result<(StatusCode, Json<WchrReport>), AppError> {
    let report = state.wchr.submit_report(&actor, submission).await?;
    Ok((StatusCode::CREATED, Json(report)))
}

async fn get_report(
    State(state): State<AppState>,
    _actor: Actor,
    UrlPath(document_id): UrlPath<String>,
) -> Result<Json<WchrReport>, AppError> {
    Ok(Json(state.wchr.get_report(&document_id).await?))
}

fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/employees", get(list_employees))
        .route("/schedules", post(submit_schedule).get(list_schedules))
        .route("/schedules/draft", post(save_draft_schedule))
        .route("/schedules/{id}", get(get_schedule))
        .route("/schedules/{id}/review", post(review_schedule))
        .route("/schedules/{id}/resubmit", post(resubmit_schedule))
        .route("/wchr/flights", get(day_flight_board))
        .route("/wchr/flights/close", post(close_flight))
        .route("/wchr/flights/{flight_key}", get(get_flight))
        .route("/wchr/reports", post(submit_report))
        .route("/wchr/reports/{document_id}", get(get_report))
        .with_state(state)
        .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()))
}

// --- Entry point ---

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();
    let cli = Cli::parse();

    let subscriber = FmtSubscriber::builder()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("setting default tracing subscriber")?;

    let bind = cli
        .bind
        .or_else(|| env::var("RAMPDESK_BIND").ok().and_then(|s| s.parse().ok()))
        .unwrap_or_else(|| SocketAddr::from(DEFAULT_BIND));

    let directory = Arc::new(InMemoryDirectory::new());
    let budgets = Arc::new(InMemoryBudgetStore::new());

    let employees_file = cli
        .employees_file
        .or_else(|| env_path("RAMPDESK_EMPLOYEES_FILE"));
    if let Some(path) = employees_file {
        let employees: Vec<Employee> = load_seed(&path, "employee")?;
        info!(
            "Seeding {} employees from {}",
            employees.len(),
            path.display()
        );
        for employee in employees {
            directory.insert(employee);
        }
    }
    if directory.is_empty() {
        warn!("Employee directory is empty; schedule submissions will fail validation");
    }

    let budgets_file = cli.budgets_file.or_else(|| env_path("RAMPDESK_BUDGETS_FILE"));
    if let Some(path) = budgets_file {
        let seeded: Vec<AirlineBudget> = load_seed(&path, "budget")?;
        info!(
            "Seeding {} airline budgets from {}",
            seeded.len(),
            path.display()
        );
        for budget in seeded {
            budgets.set_budget(budget).await?;
        }
    }

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let schedules = Arc::new(ScheduleService::new(
        directory.clone(),
        Arc::new(InMemoryScheduleStore::new()),
        budgets,
        clock.clone(),
    ));
    let wchr = Arc::new(WchrService::new(
        Arc::new(InMemoryFlightStore::new()),
        Arc::new(InMemoryReportStore::new()),
        clock,
    ));

    let state = AppState {
        directory,
        schedules,
        wchr,
    };

    info!("rampdesk-core listening on {}", bind);
    let listener = tokio::net::TcpListener::bind(bind)
        .await
        .with_context(|| format!("binding to {}", bind))?;
    axum::serve(listener, router(state))
        .await
        .context("serving HTTP")?;
    Ok(())
}
