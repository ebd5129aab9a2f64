use actix_web::http::StatusCode;
use actix_web::{middleware, web, App, HttpRequest, HttpResponse, HttpServer, ResponseError};
use serde::{Deserialize, Serialize};
use std::sync::{Mutex, MutexGuard};

use crate::casting::commit::{CommitManager, StaffConfirmation};
use crate::casting::session::{CastingSession, CastingSnapshot};
use crate::casting::types::{PlayerId, RoleId};
use crate::config::{CastingPolicy, ServerConfig};
use crate::error::CastingError;
use crate::store::CsvStore;

const PASSWORD_HEADER: &str = "X-Admin-Password";

// One session per server; loading a new snapshot replaces it (last write wins)
pub struct AppState {
    pub session: Mutex<Option<CastingSession>>,
    pub commits: Mutex<CommitManager<CsvStore>>,
    pub default_policy: CastingPolicy,
    pub admin_password: String,
}

impl AppState {
    pub fn new(store: CsvStore, default_policy: CastingPolicy, admin_password: String) -> Self {
        Self {
            session: Mutex::new(None),
            commits: Mutex::new(CommitManager::new(store)),
            default_policy,
            admin_password,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("Unauthorized")]
    Unauthorized,
    #[error("no casting session loaded")]
    NoSession,
    #[error("server state is unavailable")]
    Poisoned,
    #[error(transparent)]
    Casting(#[from] CastingError),
}

impl ResponseError for ApiError {
    fn status_code(&self) -> StatusCode {
        match self {
            ApiError::Unauthorized => StatusCode::UNAUTHORIZED,
            ApiError::NoSession => StatusCode::NOT_FOUND,
            ApiError::Poisoned => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::Casting(err) => match err {
                CastingError::InvalidPreferenceList { .. }
                | CastingError::UnknownPlayer(_)
                | CastingError::UnknownRole(_)
                | CastingError::RoleOutsideCategory { .. }
                | CastingError::InvalidPolicy(_)
                | CastingError::RoundTooLarge { .. }
                | CastingError::NotConfirmed => StatusCode::BAD_REQUEST,
                CastingError::LockConflict(_)
                | CastingError::AlreadyCommitted(_)
                | CastingError::NoSimulation
                | CastingError::StaleSimulation { .. }
                | CastingError::FinalizedLock { .. } => StatusCode::CONFLICT,
                CastingError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
        }
    }

    fn error_response(&self) -> HttpResponse {
        if self.status_code().is_server_error() {
            tracing::error!(error = %self, "request failed");
        }
        let mut body = serde_json::json!({"success": false, "error": self.to_string()});
        match self {
            ApiError::Casting(CastingError::LockConflict(conflicts)) => {
                body["conflicts"] = serde_json::json!(conflicts);
            }
            ApiError::Casting(CastingError::InvalidPreferenceList { player, violation }) => {
                body["player"] = serde_json::json!(player);
                body["violation"] = serde_json::json!(violation);
            }
            _ => {}
        }
        HttpResponse::build(self.status_code()).json(body)
    }
}

type ApiResult = Result<HttpResponse, ApiError>;

#[derive(Deserialize)]
pub struct LoginRequest {
    password: String,
}

#[derive(Deserialize)]
pub struct LockRequest {
    player: PlayerId,
    role: RoleId,
}

#[derive(Deserialize)]
pub struct CommitRequest {
    #[serde(default)]
    confirmed_by: String,
}

#[derive(Serialize)]
pub struct SessionResponse {
    success: bool,
    round: String,
    players: usize,
    roles: usize,
    preferences: usize,
    revision: u64,
    committed: bool,
}

fn check_password(req: &HttpRequest, state: &AppState) -> Result<(), ApiError> {
    let password = req
        .headers()
        .get(PASSWORD_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");
    if password != state.admin_password {
        return Err(ApiError::Unauthorized);
    }
    Ok(())
}

fn lock<T>(mutex: &Mutex<T>) -> Result<MutexGuard<'_, T>, ApiError> {
    mutex.lock().map_err(|_| ApiError::Poisoned)
}

fn session_mut(guard: &mut Option<CastingSession>) -> Result<&mut CastingSession, ApiError> {
    guard.as_mut().ok_or(ApiError::NoSession)
}

// Admin login endpoint
async fn admin_login(req: web::Json<LoginRequest>, state: web::Data<AppState>) -> ApiResult {
    if req.password == state.admin_password {
        Ok(HttpResponse::Ok().json(serde_json::json!({"success": true})))
    } else {
        Err(ApiError::Unauthorized)
    }
}

// Replace the session with a new snapshot
async fn load_session(
    req: HttpRequest,
    snapshot: web::Json<CastingSnapshot>,
    state: web::Data<AppState>,
) -> ApiResult {
    check_password(&req, &state)?;

    let session = CastingSession::new(snapshot.into_inner(), state.default_policy.clone())?;
    let committed = lock(&state.commits)?.is_committed(session.round())?;
    let response = SessionResponse {
        success: true,
        round: session.round().category.to_string(),
        players: session.roster().len(),
        roles: session.catalog().in_category(&session.round().category).count(),
        preferences: session.preferences().len(),
        revision: session.revision(),
        committed,
    };

    let mut guard = lock(&state.session)?;
    if guard.is_some() {
        tracing::warn!(round = %response.round, "replacing the loaded casting session");
    }
    *guard = Some(session);
    Ok(HttpResponse::Ok().json(response))
}

async fn update_policy(
    req: HttpRequest,
    policy: web::Json<CastingPolicy>,
    state: web::Data<AppState>,
) -> ApiResult {
    check_password(&req, &state)?;
    let mut guard = lock(&state.session)?;
    let session = session_mut(&mut guard)?;
    session.update_policy(policy.into_inner())?;
    Ok(HttpResponse::Ok().json(serde_json::json!({"success": true, "revision": session.revision()})))
}

async fn simulate(req: HttpRequest, state: web::Data<AppState>) -> ApiResult {
    check_password(&req, &state)?;
    let mut guard = lock(&state.session)?;
    let session = session_mut(&mut guard)?;
    if lock(&state.commits)?.is_committed(session.round())? {
        return Err(CastingError::AlreadyCommitted(session.round().clone()).into());
    }
    let result = session.simulate()?;
    Ok(HttpResponse::Ok().json(result))
}

async fn list_locks(req: HttpRequest, state: web::Data<AppState>) -> ApiResult {
    check_password(&req, &state)?;
    let mut guard = lock(&state.session)?;
    let session = session_mut(&mut guard)?;
    Ok(HttpResponse::Ok().json(serde_json::json!({
        "revision": session.revision(),
        "locks": session.locks().entries(),
    })))
}

async fn toggle_lock(
    req: HttpRequest,
    body: web::Json<LockRequest>,
    state: web::Data<AppState>,
) -> ApiResult {
    check_password(&req, &state)?;
    let mut guard = lock(&state.session)?;
    let session = session_mut(&mut guard)?;
    let outcome = session.toggle_lock(&body.player, &body.role)?;
    Ok(HttpResponse::Ok().json(serde_json::json!({
        "success": true,
        "revision": session.revision(),
        "toggle": outcome,
    })))
}

async fn exclude(
    req: HttpRequest,
    body: web::Json<LockRequest>,
    state: web::Data<AppState>,
) -> ApiResult {
    check_password(&req, &state)?;
    let mut guard = lock(&state.session)?;
    let session = session_mut(&mut guard)?;
    let entry = session.exclude(&body.player, &body.role)?;
    Ok(HttpResponse::Ok().json(serde_json::json!({
        "success": true,
        "revision": session.revision(),
        "lock": entry,
    })))
}

async fn include(
    req: HttpRequest,
    body: web::Json<LockRequest>,
    state: web::Data<AppState>,
) -> ApiResult {
    check_password(&req, &state)?;
    let mut guard = lock(&state.session)?;
    let session = session_mut(&mut guard)?;
    let removed = session.include(&body.player, &body.role)?;
    Ok(HttpResponse::Ok().json(serde_json::json!({
        "success": true,
        "revision": session.revision(),
        "removed": removed,
    })))
}

async fn commit(
    req: HttpRequest,
    body: web::Json<CommitRequest>,
    state: web::Data<AppState>,
) -> ApiResult {
    check_password(&req, &state)?;
    let confirmation = StaffConfirmation::confirm(body.confirmed_by.as_str())?;
    let mut guard = lock(&state.session)?;
    let session = session_mut(&mut guard)?;
    let mut commits = lock(&state.commits)?;
    let outcome = session.commit(&mut *commits, &confirmation)?;
    Ok(HttpResponse::Ok().json(outcome))
}

// Stats endpoint, public
async fn get_stats(state: web::Data<AppState>) -> ApiResult {
    let guard = lock(&state.session)?;
    let session = guard.as_ref().ok_or(ApiError::NoSession)?;
    Ok(HttpResponse::Ok().json(session.stats()))
}

/// Registers the staff console routes.
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.route("/api/login", web::post().to(admin_login))
        .route("/api/session", web::post().to(load_session))
        .route("/api/policy", web::post().to(update_policy))
        .route("/api/simulate", web::get().to(simulate))
        .route("/api/locks", web::get().to(list_locks))
        .route("/api/locks/toggle", web::post().to(toggle_lock))
        .route("/api/locks/exclude", web::post().to(exclude))
        .route("/api/locks/include", web::post().to(include))
        .route("/api/commit", web::post().to(commit))
        .route("/api/stats", web::get().to(get_stats));
}

pub async fn start_server(config: ServerConfig, default_policy: CastingPolicy) -> std::io::Result<()> {
    let store = CsvStore::new(&config.store_dir).map_err(|e| std::io::Error::other(e.to_string()))?;
    let app_state = web::Data::new(AppState::new(store, default_policy, config.admin_password));

    HttpServer::new(move || {
        App::new()
            .app_data(app_state.clone())
            .wrap(middleware::Logger::default())
            .configure(configure)
    })
    .bind(("0.0.0.0", config.port))?
    .run()
    .await
}
