//! HTTP handlers.
//!
//! Handlers stay thin: authenticate through [`Caller`], build the stage service for the
//! request and hand the request DTO over. Authorization, validation and workflow rules all
//! live in `prism-core`.

use crate::error::{ApiError, ApiResult};
use crate::extract::JsonBody;
use crate::session::Caller;
use crate::AppState;
use api_shared::dto::{
    AcceptanceReq, ErrorRes, ExportQuery, LoginReq, LoginRes, MorphologyReq, OrderReq,
    RegisterVisitReq, ResultsReq, SearchQuery, UnlockReq,
};
use api_shared::{HealthRes, HealthService};
use axum::extract::{Path as AxumPath, Query, State};
use axum::http::{Method, StatusCode, Uri};
use axum::response::Json;
use prism_core::aggregate::VisitBundle;
use prism_core::audit::{AuditEntry, UnlockEvent};
use prism_core::records::{LabAcceptance, LabOrder, LabResults, Morphology, Visit, VisitKey};
use prism_core::repositories::{
    acceptance::AcceptanceService,
    admin::{AdminService, LockStatus},
    morphology::MorphologyService,
    orders::{OrderListing, OrderService},
    results::{ExportRow, ResultsService},
    visits::{Registration, VisitService},
};
use prism_core::{LabKind, Role};

fn lab_kind(raw: &str) -> ApiResult<LabKind> {
    Ok(raw.parse::<LabKind>()?)
}

// ============================================================================
// Health and session
// ============================================================================

#[utoipa::path(
    get,
    path = "/api/ping",
    responses(
        (status = 200, description = "Health check response", body = HealthRes)
    )
)]
/// Liveness check; needs no session.
pub async fn ping() -> Json<HealthRes> {
    Json(HealthService::check_health())
}

#[utoipa::path(
    post,
    path = "/api/auth/login",
    request_body = LoginReq,
    responses(
        (status = 200, description = "Session token issued", body = LoginRes),
        (status = 400, description = "Missing or unknown role", body = ErrorRes),
        (status = 401, description = "Incorrect password", body = ErrorRes),
        (status = 500, description = "No password configured for the role", body = ErrorRes)
    )
)]
/// Exchange a role and its shared password for a session token.
#[axum::debug_handler(state = AppState)]
pub async fn login(
    State(state): State<AppState>,
    JsonBody(req): JsonBody<LoginReq>,
) -> ApiResult<Json<LoginRes>> {
    let role = req.role.trim();
    if role.is_empty() || req.password.is_empty() {
        return Err(ApiError::bad_request("role and password are required"));
    }
    let role: Role = role.parse()?;

    state.credentials.check(role, &req.password)?;
    let issued = state.keys.issue(role)?;
    tracing::info!("Session issued for role {}", role);

    Ok(Json(LoginRes {
        token: issued.token,
        role: issued.role.to_string(),
        expires_at: issued.expires_at,
        expires_in: format!("{}h", state.keys.ttl().num_hours()),
    }))
}

// ============================================================================
// Visits
// ============================================================================

#[utoipa::path(
    post,
    path = "/api/patients",
    request_body = RegisterVisitReq,
    responses(
        (status = 200, description = "Visit registered or updated"),
        (status = 400, description = "Validation failure", body = ErrorRes),
        (status = 403, description = "Role may not register visits", body = ErrorRes)
    ),
    security(("bearer" = []))
)]
/// Register a visit, or update the registration of an existing one.
#[axum::debug_handler(state = AppState)]
pub async fn register_visit(
    State(state): State<AppState>,
    Caller(identity): Caller,
    JsonBody(req): JsonBody<RegisterVisitReq>,
) -> ApiResult<Json<Registration>> {
    let registration = VisitService::new(state.registry)
        .register(&identity, req.into())
        .await?;
    Ok(Json(registration))
}

#[utoipa::path(
    get,
    path = "/api/patients/{cr}",
    params(("cr" = String, Path, description = "12-digit record number")),
    responses(
        (status = 200, description = "Every record held for the record number"),
        (status = 404, description = "Record number not registered", body = ErrorRes)
    ),
    security(("bearer" = []))
)]
/// Load every stage of every visit for one record number.
#[axum::debug_handler(state = AppState)]
pub async fn load_all(
    State(state): State<AppState>,
    Caller(identity): Caller,
    AxumPath(cr): AxumPath<String>,
) -> ApiResult<Json<VisitBundle>> {
    let bundle = VisitService::new(state.registry)
        .load_all(&identity, &cr)
        .await?;
    Ok(Json(bundle))
}

#[utoipa::path(
    get,
    path = "/api/search",
    params(SearchQuery),
    responses(
        (status = 200, description = "Latest visit of each matching record number"),
        (status = 400, description = "Query too short", body = ErrorRes)
    ),
    security(("bearer" = []))
)]
#[axum::debug_handler(state = AppState)]
pub async fn search(
    State(state): State<AppState>,
    Caller(identity): Caller,
    Query(query): Query<SearchQuery>,
) -> ApiResult<Json<Vec<Visit>>> {
    let visits = VisitService::new(state.registry)
        .search(&identity, query.q.as_deref().unwrap_or_default())
        .await?;
    Ok(Json(visits))
}

// ============================================================================
// Morphology
// ============================================================================

#[utoipa::path(
    post,
    path = "/api/morph",
    request_body = MorphologyReq,
    responses(
        (status = 200, description = "Morphology saved"),
        (status = 422, description = "Visit not registered", body = ErrorRes),
        (status = 423, description = "Morphology is locked", body = ErrorRes)
    ),
    security(("bearer" = []))
)]
#[axum::debug_handler(state = AppState)]
pub async fn save_morphology(
    State(state): State<AppState>,
    Caller(identity): Caller,
    JsonBody(req): JsonBody<MorphologyReq>,
) -> ApiResult<Json<Morphology>> {
    let saved = MorphologyService::new(state.registry)
        .save(&identity, req.into())
        .await?;
    Ok(Json(saved))
}

#[utoipa::path(
    post,
    path = "/api/morph/unlock",
    request_body = UnlockReq,
    responses(
        (status = 200, description = "Morphology unlocked"),
        (status = 404, description = "No morphology for the visit", body = ErrorRes)
    ),
    security(("bearer" = []))
)]
#[axum::debug_handler(state = AppState)]
pub async fn unlock_morphology(
    State(state): State<AppState>,
    Caller(identity): Caller,
    JsonBody(req): JsonBody<UnlockReq>,
) -> ApiResult<Json<UnlockEvent>> {
    let event = MorphologyService::new(state.registry)
        .unlock(&identity, &req.record_number, &req.visit_id, req.reason())
        .await?;
    Ok(Json(event))
}

// ============================================================================
// Orders
// ============================================================================

#[utoipa::path(
    post,
    path = "/api/orders/{lab}",
    request_body = OrderReq,
    params(("lab" = String, Path, description = "Lab discipline, e.g. `fish`")),
    responses(
        (status = 200, description = "Order saved"),
        (status = 400, description = "Unknown lab, panel or payment", body = ErrorRes),
        (status = 422, description = "Visit not registered", body = ErrorRes)
    ),
    security(("bearer" = []))
)]
#[axum::debug_handler(state = AppState)]
pub async fn save_order(
    State(state): State<AppState>,
    Caller(identity): Caller,
    AxumPath(lab): AxumPath<String>,
    JsonBody(req): JsonBody<OrderReq>,
) -> ApiResult<Json<LabOrder>> {
    let lab = lab_kind(&lab)?;
    let saved = OrderService::new(state.registry)
        .save(&identity, lab, req.into())
        .await?;
    Ok(Json(saved))
}

#[utoipa::path(
    get,
    path = "/api/orders/{lab}",
    params(("lab" = String, Path, description = "Lab discipline")),
    responses((status = 200, description = "Orders for the lab, newest first")),
    security(("bearer" = []))
)]
/// A lab's work list.
#[axum::debug_handler(state = AppState)]
pub async fn list_orders(
    State(state): State<AppState>,
    Caller(identity): Caller,
    AxumPath(lab): AxumPath<String>,
) -> ApiResult<Json<Vec<OrderListing>>> {
    let lab = lab_kind(&lab)?;
    let orders = OrderService::new(state.registry)
        .list_by_lab(&identity, lab)
        .await?;
    Ok(Json(orders))
}

#[utoipa::path(
    get,
    path = "/api/orders/{lab}/accepted",
    params(("lab" = String, Path, description = "Lab discipline")),
    responses((status = 200, description = "Visits already accepted by the lab")),
    security(("bearer" = []))
)]
#[axum::debug_handler(state = AppState)]
pub async fn list_accepted(
    State(state): State<AppState>,
    Caller(identity): Caller,
    AxumPath(lab): AxumPath<String>,
) -> ApiResult<Json<Vec<VisitKey>>> {
    let lab = lab_kind(&lab)?;
    let accepted = OrderService::new(state.registry)
        .accepted_by_lab(&identity, lab)
        .await?;
    Ok(Json(accepted))
}

// ============================================================================
// Acceptance
// ============================================================================

#[utoipa::path(
    post,
    path = "/api/acceptance/{lab}",
    request_body = AcceptanceReq,
    params(("lab" = String, Path, description = "Lab discipline")),
    responses(
        (status = 200, description = "Acceptance saved and locked"),
        (status = 403, description = "Role does not own the lab", body = ErrorRes),
        (status = 409, description = "Accession id held by another visit", body = ErrorRes),
        (status = 423, description = "Acceptance is locked", body = ErrorRes)
    ),
    security(("bearer" = []))
)]
#[axum::debug_handler(state = AppState)]
pub async fn save_acceptance(
    State(state): State<AppState>,
    Caller(identity): Caller,
    AxumPath(lab): AxumPath<String>,
    JsonBody(req): JsonBody<AcceptanceReq>,
) -> ApiResult<Json<LabAcceptance>> {
    let lab = lab_kind(&lab)?;
    let saved = AcceptanceService::new(state.registry)
        .save(&identity, lab, req.into())
        .await?;
    Ok(Json(saved))
}

#[utoipa::path(
    post,
    path = "/api/acceptance/{lab}/unlock",
    request_body = UnlockReq,
    params(("lab" = String, Path, description = "Lab discipline")),
    responses(
        (status = 200, description = "Acceptance unlocked"),
        (status = 404, description = "No acceptance for the visit", body = ErrorRes)
    ),
    security(("bearer" = []))
)]
#[axum::debug_handler(state = AppState)]
pub async fn unlock_acceptance(
    State(state): State<AppState>,
    Caller(identity): Caller,
    AxumPath(lab): AxumPath<String>,
    JsonBody(req): JsonBody<UnlockReq>,
) -> ApiResult<Json<UnlockEvent>> {
    let lab = lab_kind(&lab)?;
    let event = AcceptanceService::new(state.registry)
        .unlock(&identity, lab, &req.record_number, &req.visit_id, req.reason())
        .await?;
    Ok(Json(event))
}

// ============================================================================
// Results
// ============================================================================

#[utoipa::path(
    post,
    path = "/api/results/{lab}",
    request_body = ResultsReq,
    params(("lab" = String, Path, description = "Lab discipline")),
    responses(
        (status = 200, description = "Results saved and locked"),
        (status = 403, description = "Role does not own the lab", body = ErrorRes),
        (status = 422, description = "Acceptance missing", body = ErrorRes),
        (status = 423, description = "Results are locked", body = ErrorRes)
    ),
    security(("bearer" = []))
)]
#[axum::debug_handler(state = AppState)]
pub async fn save_results(
    State(state): State<AppState>,
    Caller(identity): Caller,
    AxumPath(lab): AxumPath<String>,
    JsonBody(req): JsonBody<ResultsReq>,
) -> ApiResult<Json<LabResults>> {
    let lab = lab_kind(&lab)?;
    let saved = ResultsService::new(state.registry)
        .save(&identity, lab, req.into())
        .await?;
    Ok(Json(saved))
}

#[utoipa::path(
    post,
    path = "/api/results/{lab}/unlock",
    request_body = UnlockReq,
    params(("lab" = String, Path, description = "Lab discipline")),
    responses(
        (status = 200, description = "Results unlocked"),
        (status = 404, description = "No results for the visit", body = ErrorRes)
    ),
    security(("bearer" = []))
)]
#[axum::debug_handler(state = AppState)]
pub async fn unlock_results(
    State(state): State<AppState>,
    Caller(identity): Caller,
    AxumPath(lab): AxumPath<String>,
    JsonBody(req): JsonBody<UnlockReq>,
) -> ApiResult<Json<UnlockEvent>> {
    let lab = lab_kind(&lab)?;
    let event = ResultsService::new(state.registry)
        .unlock(&identity, lab, &req.record_number, &req.visit_id, req.reason())
        .await?;
    Ok(Json(event))
}

#[utoipa::path(
    get,
    path = "/api/results/{lab}",
    params(("lab" = String, Path, description = "Lab discipline"), ExportQuery),
    responses(
        (status = 200, description = "Orders in the date range with every later stage"),
        (status = 400, description = "Missing or malformed dates", body = ErrorRes)
    ),
    security(("bearer" = []))
)]
/// Results export over an inclusive order-date range.
#[axum::debug_handler(state = AppState)]
pub async fn export_results(
    State(state): State<AppState>,
    Caller(identity): Caller,
    AxumPath(lab): AxumPath<String>,
    Query(query): Query<ExportQuery>,
) -> ApiResult<Json<Vec<ExportRow>>> {
    let lab = lab_kind(&lab)?;
    let window = query.window()?;
    let rows = ResultsService::new(state.registry)
        .export(&identity, lab, window)
        .await?;
    Ok(Json(rows))
}

// ============================================================================
// Admin
// ============================================================================

#[utoipa::path(
    get,
    path = "/api/admin/audit/{cr}",
    params(("cr" = String, Path, description = "12-digit record number")),
    responses((status = 200, description = "Audit entries, newest first")),
    security(("bearer" = []))
)]
#[axum::debug_handler(state = AppState)]
pub async fn audit_history(
    State(state): State<AppState>,
    Caller(identity): Caller,
    AxumPath(cr): AxumPath<String>,
) -> ApiResult<Json<Vec<AuditEntry>>> {
    let entries = AdminService::new(state.registry)
        .audit_history(&identity, &cr)
        .await?;
    Ok(Json(entries))
}

#[utoipa::path(
    get,
    path = "/api/admin/unlocks",
    responses((status = 200, description = "Recent unlock events, newest first")),
    security(("bearer" = []))
)]
#[axum::debug_handler(state = AppState)]
pub async fn unlock_history(
    State(state): State<AppState>,
    Caller(identity): Caller,
) -> ApiResult<Json<Vec<UnlockEvent>>> {
    let events = AdminService::new(state.registry)
        .unlock_history(&identity)
        .await?;
    Ok(Json(events))
}

#[utoipa::path(
    get,
    path = "/api/admin/locks/{cr}/{labid}",
    params(
        ("cr" = String, Path, description = "12-digit record number"),
        ("labid" = String, Path, description = "Visit id")
    ),
    responses(
        (status = 200, description = "Lock state of every lockable record of the visit"),
        (status = 404, description = "Visit not registered", body = ErrorRes)
    ),
    security(("bearer" = []))
)]
#[axum::debug_handler(state = AppState)]
pub async fn lock_status(
    State(state): State<AppState>,
    Caller(identity): Caller,
    AxumPath((cr, labid)): AxumPath<(String, String)>,
) -> ApiResult<Json<LockStatus>> {
    let status = AdminService::new(state.registry)
        .lock_status(&identity, &cr, &labid)
        .await?;
    Ok(Json(status))
}

/// Unknown routes.
pub async fn not_found(method: Method, uri: Uri) -> ApiError {
    ApiError::new(
        StatusCode::NOT_FOUND,
        format!("Route not found: {} {}", method, uri.path()),
    )
}
