use crate::catalog::Catalog;
use crate::contests::ContestService;
use crate::domain::{Identity, MemberStatus, Role};
use crate::error::LmsError;
use crate::feed::FixtureFeed;
use crate::observability;
use crate::picks::PickService;
use crate::poller::Poller;
use crate::results::{RoundOutcome, RoundProcessor};
use crate::settings::Settings;
use crate::storage::Storage;
use axum::{
    extract::{FromRequestParts, Path},
    http::{request::Parts, Method, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post, put},
    Extension, Json, Router,
};
use hyper::Server;
use serde::Deserialize;
use serde_json::json;
use std::net::SocketAddr;
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::cors::{Any, CorsLayer};
use tracing::error;
use uuid::Uuid;

#[derive(Clone)]
pub struct AppState {
    pub storage: Arc<dyn Storage>,
    pub settings: Arc<Settings>,
    pub contests: Arc<ContestService>,
    pub picks: Arc<PickService>,
    pub processor: Arc<RoundProcessor>,
    pub catalog: Arc<Catalog>,
    pub poller: Arc<Poller>,
    pub feed: Arc<dyn FixtureFeed>,
}

/// The identity collaborator hands us authenticated caller details in
/// trusted headers; the core never authenticates.
#[async_trait::async_trait]
impl<S> FromRequestParts<S> for Identity
where
    S: Send + Sync,
{
    type Rejection = (StatusCode, Json<serde_json::Value>);

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let header = |name: &str| {
            parts
                .headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(|v| v.to_string())
        };

        let user_key = header("x-user-id").ok_or_else(|| {
            (
                StatusCode::UNAUTHORIZED,
                Json(json!({ "error": "missing x-user-id header" })),
            )
        })?;
        let display_name = header("x-user-name").unwrap_or_else(|| user_key.clone());
        let role = match header("x-user-role").as_deref() {
            Some("admin") => Role::Admin,
            _ => Role::User,
        };

        Ok(Identity {
            user_key,
            display_name,
            role,
        })
    }
}

impl IntoResponse for LmsError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            LmsError::Validation(msg) => (StatusCode::UNPROCESSABLE_ENTITY, msg.clone()),
            LmsError::Rejected(msg) => (StatusCode::CONFLICT, msg.clone()),
            LmsError::Conflict(msg) => (StatusCode::CONFLICT, msg.clone()),
            LmsError::NotFound(msg) => (StatusCode::NOT_FOUND, msg.clone()),
            LmsError::Feed { message } => (StatusCode::BAD_GATEWAY, message.clone()),
            // Internal details stay in the server log.
            other => {
                error!("internal error: {other}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal error".to_string(),
                )
            }
        };
        (status, Json(json!({ "error": message }))).into_response()
    }
}

/// Health check endpoint
async fn health() -> impl IntoResponse {
    Json(json!({
        "status": "healthy",
        "service": "lms-server",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

async fn metrics() -> impl IntoResponse {
    observability::render_metrics()
}

#[derive(Debug, Deserialize)]
struct CreateContestParams {
    name: String,
    season: Option<String>,
    start_gameweek: Option<u32>,
}

async fn create_contest(
    Extension(state): Extension<AppState>,
    identity: Identity,
    Json(params): Json<CreateContestParams>,
) -> Result<impl IntoResponse, LmsError> {
    let contest = state
        .contests
        .create_contest(
            &identity,
            &params.name,
            params.season,
            params.start_gameweek,
        )
        .await?;
    Ok((StatusCode::CREATED, Json(contest)))
}

#[derive(Debug, Deserialize)]
struct JoinContestParams {
    invite_token: String,
}

async fn join_contest(
    Extension(state): Extension<AppState>,
    identity: Identity,
    Json(params): Json<JoinContestParams>,
) -> Result<impl IntoResponse, LmsError> {
    let member = state
        .contests
        .join_contest(&identity, &params.invite_token)
        .await?;
    Ok((StatusCode::CREATED, Json(member)))
}

async fn start_contest(
    Extension(state): Extension<AppState>,
    identity: Identity,
    Path(contest_id): Path<Uuid>,
) -> Result<impl IntoResponse, LmsError> {
    let contest = state.contests.start_contest(&identity, contest_id).await?;
    Ok(Json(contest))
}

async fn list_contests(
    Extension(state): Extension<AppState>,
    identity: Identity,
) -> Result<impl IntoResponse, LmsError> {
    let contests = state.contests.list_contests(&identity).await?;
    Ok(Json(contests))
}

async fn get_contest(
    Extension(state): Extension<AppState>,
    identity: Identity,
    Path(contest_id): Path<Uuid>,
) -> Result<impl IntoResponse, LmsError> {
    let detail = state
        .contests
        .get_contest_detail(&identity, contest_id)
        .await?;
    Ok(Json(detail))
}

async fn delete_contest(
    Extension(state): Extension<AppState>,
    identity: Identity,
    Path(contest_id): Path<Uuid>,
) -> Result<impl IntoResponse, LmsError> {
    state.contests.delete_contest(&identity, contest_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Deserialize)]
struct SubmitPickParams {
    gameweek: Option<u32>,
    team_id: Uuid,
}

async fn submit_pick(
    Extension(state): Extension<AppState>,
    identity: Identity,
    Path(contest_id): Path<Uuid>,
    Json(params): Json<SubmitPickParams>,
) -> Result<impl IntoResponse, LmsError> {
    let pick = state
        .picks
        .submit_pick(&identity, contest_id, params.gameweek, params.team_id)
        .await?;
    Ok((StatusCode::CREATED, Json(pick)))
}

async fn list_round_picks(
    Extension(state): Extension<AppState>,
    identity: Identity,
    Path((contest_id, gameweek)): Path<(Uuid, u32)>,
) -> Result<impl IntoResponse, LmsError> {
    let picks = state
        .picks
        .list_round_picks(&identity, contest_id, Some(gameweek))
        .await?;
    Ok(Json(picks))
}

async fn process_round(
    Extension(state): Extension<AppState>,
    identity: Identity,
    Path((contest_id, gameweek)): Path<(Uuid, u32)>,
) -> Result<impl IntoResponse, LmsError> {
    let contest = state
        .storage
        .get_contest(contest_id)
        .await?
        .ok_or_else(|| LmsError::NotFound(format!("contest {contest_id}")))?;
    if !identity.is_site_admin() && contest.admin_user_key != identity.user_key {
        return Err(LmsError::Rejected(
            "only the contest admin may process results".into(),
        ));
    }

    let outcome = state.processor.process_round(contest_id, gameweek).await?;
    let body = match outcome {
        RoundOutcome::Processed(processed) => json!({
            "status": "processed",
            "eliminated": processed.eliminated,
            "alive_remaining": processed.alive_remaining,
            "completed": processed.completed,
            "drawn": processed.drawn,
            "winner_member_id": processed.winner_member_id,
        }),
        RoundOutcome::AlreadyProcessed => json!({ "status": "already_processed" }),
        RoundOutcome::NotReady { unfinished } => json!({
            "status": "not_ready",
            "unfinished_fixtures": unfinished,
        }),
        RoundOutcome::NotActive => json!({ "status": "not_active" }),
    };
    Ok(Json(body))
}

#[derive(Debug, Deserialize)]
struct AddMemberParams {
    user_key: String,
    display_name: Option<String>,
}

async fn add_member(
    Extension(state): Extension<AppState>,
    identity: Identity,
    Path(contest_id): Path<Uuid>,
    Json(params): Json<AddMemberParams>,
) -> Result<impl IntoResponse, LmsError> {
    let member = state
        .contests
        .admin_add_member(
            &identity,
            contest_id,
            &params.user_key,
            params.display_name.as_deref().unwrap_or(""),
        )
        .await?;
    Ok((StatusCode::CREATED, Json(member)))
}

#[derive(Debug, Deserialize)]
struct OverrideStatusParams {
    status: MemberStatus,
    eliminated_gameweek: Option<u32>,
}

async fn override_member_status(
    Extension(state): Extension<AppState>,
    identity: Identity,
    Path((contest_id, member_id)): Path<(Uuid, Uuid)>,
    Json(params): Json<OverrideStatusParams>,
) -> Result<impl IntoResponse, LmsError> {
    let member = state
        .contests
        .admin_override_member_status(
            &identity,
            contest_id,
            member_id,
            params.status,
            params.eliminated_gameweek,
        )
        .await?;
    Ok(Json(member))
}

#[derive(Debug, Deserialize)]
struct ImportPickParams {
    gameweek: u32,
    team_id: Uuid,
}

async fn import_pick(
    Extension(state): Extension<AppState>,
    identity: Identity,
    Path((contest_id, member_id)): Path<(Uuid, Uuid)>,
    Json(params): Json<ImportPickParams>,
) -> Result<impl IntoResponse, LmsError> {
    let pick = state
        .contests
        .admin_import_pick(
            &identity,
            contest_id,
            member_id,
            params.gameweek,
            params.team_id,
        )
        .await?;
    Ok((StatusCode::CREATED, Json(pick)))
}

fn require_site_admin(identity: &Identity) -> Result<(), LmsError> {
    if identity.is_site_admin() {
        Ok(())
    } else {
        Err(LmsError::Rejected("site admin only".into()))
    }
}

async fn import_season(
    Extension(state): Extension<AppState>,
    identity: Identity,
    Path(season): Path<String>,
) -> Result<impl IntoResponse, LmsError> {
    require_site_admin(&identity)?;
    let summary = state
        .catalog
        .import_season(state.feed.as_ref(), &season)
        .await?;
    state.settings.set_current_season(&season).await?;
    Ok(Json(summary))
}

async fn poll_once(
    Extension(state): Extension<AppState>,
    identity: Identity,
) -> Result<impl IntoResponse, LmsError> {
    require_site_admin(&identity)?;
    let summary = state.poller.tick().await?;
    Ok(Json(summary))
}

#[derive(Debug, Deserialize)]
struct GameweekOverrideParams {
    gameweek: Option<u32>,
}

async fn set_gameweek_override(
    Extension(state): Extension<AppState>,
    identity: Identity,
    Json(params): Json<GameweekOverrideParams>,
) -> Result<impl IntoResponse, LmsError> {
    require_site_admin(&identity)?;
    state.settings.set_gameweek_override(params.gameweek).await?;
    Ok(Json(json!({ "gameweek_override": params.gameweek })))
}

#[derive(Debug, Deserialize)]
struct DeadlineBypassParams {
    on: bool,
}

async fn set_deadline_bypass(
    Extension(state): Extension<AppState>,
    identity: Identity,
    Json(params): Json<DeadlineBypassParams>,
) -> Result<impl IntoResponse, LmsError> {
    require_site_admin(&identity)?;
    state.settings.set_deadline_bypass(params.on).await?;
    Ok(Json(json!({ "deadline_bypass": params.on })))
}

/// Create the HTTP server with all routes
pub fn create_server(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health))
        .route("/metrics", get(metrics))
        .route("/contests", post(create_contest).get(list_contests))
        .route("/contests/join", post(join_contest))
        .route(
            "/contests/:id",
            get(get_contest).delete(delete_contest),
        )
        .route("/contests/:id/start", post(start_contest))
        .route("/contests/:id/picks", post(submit_pick))
        .route("/contests/:id/gameweeks/:gw/picks", get(list_round_picks))
        .route("/contests/:id/gameweeks/:gw/process", post(process_round))
        .route("/contests/:id/members", post(add_member))
        .route(
            "/contests/:id/members/:member_id/status",
            put(override_member_status),
        )
        .route("/contests/:id/members/:member_id/picks", post(import_pick))
        .route("/admin/import/:season", post(import_season))
        .route("/admin/poll", post(poll_once))
        .route("/admin/settings/gameweek-override", put(set_gameweek_override))
        .route("/admin/settings/deadline-bypass", put(set_deadline_bypass))
        .layer(Extension(state))
        .layer(ServiceBuilder::new().layer(cors))
}

/// Start the HTTP server on the specified port
pub async fn start_server(
    state: AppState,
    port: u16,
) -> Result<(), Box<dyn std::error::Error>> {
    let app = create_server(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));

    println!("🚀 HTTP server running on http://localhost:{port}");
    println!("💚 Health check: http://localhost:{port}/health");
    println!("📈 Metrics:      http://localhost:{port}/metrics");

    Server::bind(&addr).serve(app.into_make_service()).await?;

    Ok(())
}
