//! # API REST
//!
//! REST API implementation for PRISM.
//!
//! Handles:
//! - HTTP endpoints with axum
//! - bearer-token sessions
//! - OpenAPI/Swagger documentation
//! - REST-specific concerns (status mapping, CORS, request tracing)
//!
//! Uses `api-shared` for session tokens and wire types, and `prism-core` for everything else.

#![warn(rust_2018_idioms)]

pub mod error;
pub mod extract;
pub mod routes;
pub mod session;

use api_shared::{RoleCredentials, SessionKeys};
use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use axum::Router;
use prism_core::Registry;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use utoipa::openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme};
use utoipa::{Modify, OpenApi};
use utoipa_swagger_ui::SwaggerUi;

const MAX_BODY_BYTES: usize = 1024 * 1024;

/// Application state shared by every handler.
#[derive(Clone)]
pub struct AppState {
    pub registry: Registry,
    pub keys: SessionKeys,
    pub credentials: Arc<RoleCredentials>,
}

impl AppState {
    pub fn new(registry: Registry, keys: SessionKeys, credentials: RoleCredentials) -> Self {
        Self {
            registry,
            keys,
            credentials: Arc::new(credentials),
        }
    }
}

struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "bearer",
                SecurityScheme::Http(
                    HttpBuilder::new()
                        .scheme(HttpAuthScheme::Bearer)
                        .bearer_format("JWT")
                        .build(),
                ),
            );
        }
    }
}

#[derive(OpenApi)]
#[openapi(
    paths(
        routes::ping,
        routes::login,
        routes::register_visit,
        routes::load_all,
        routes::search,
        routes::save_morphology,
        routes::unlock_morphology,
        routes::save_order,
        routes::list_orders,
        routes::list_accepted,
        routes::save_acceptance,
        routes::unlock_acceptance,
        routes::save_results,
        routes::unlock_results,
        routes::export_results,
        routes::audit_history,
        routes::unlock_history,
        routes::lock_status,
    ),
    components(schemas(
        api_shared::HealthRes,
        api_shared::dto::LoginReq,
        api_shared::dto::LoginRes,
        api_shared::dto::ErrorRes,
        api_shared::dto::RegisterVisitReq,
        api_shared::dto::MorphologyReq,
        api_shared::dto::OrderReq,
        api_shared::dto::AcceptanceReq,
        api_shared::dto::ResultsReq,
        api_shared::dto::UnlockReq,
    )),
    modifiers(&SecurityAddon)
)]
pub struct ApiDoc;

/// Build the full router: API routes, Swagger UI, CORS and request tracing.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/ping", get(routes::ping))
        .route("/api/auth/login", post(routes::login))
        .route("/api/patients", post(routes::register_visit))
        .route("/api/patients/:cr", get(routes::load_all))
        .route("/api/search", get(routes::search))
        .route("/api/morph", post(routes::save_morphology))
        .route("/api/morph/unlock", post(routes::unlock_morphology))
        .route(
            "/api/orders/:lab",
            get(routes::list_orders).post(routes::save_order),
        )
        .route("/api/orders/:lab/accepted", get(routes::list_accepted))
        .route("/api/acceptance/:lab", post(routes::save_acceptance))
        .route("/api/acceptance/:lab/unlock", post(routes::unlock_acceptance))
        .route(
            "/api/results/:lab",
            get(routes::export_results).post(routes::save_results),
        )
        .route("/api/results/:lab/unlock", post(routes::unlock_results))
        .route("/api/admin/audit/:cr", get(routes::audit_history))
        .route("/api/admin/unlocks", get(routes::unlock_history))
        .route("/api/admin/locks/:cr/:labid", get(routes::lock_status))
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .fallback(routes::not_found)
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use api_shared::SessionConfig;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use chrono::Duration;
    use http_body_util::BodyExt;
    use prism_core::{CoreConfig, Role};
    use serde_json::{json, Value};
    use tower::ServiceExt;

    struct TestApp {
        app: Router,
        keys: SessionKeys,
    }

    impl TestApp {
        fn new() -> Self {
            let keys = SessionKeys::new(SessionConfig::new("test-secret", Duration::hours(1)).unwrap());
            let credentials = RoleCredentials::default()
                .with_password(Role::Resident, "resident-pw")
                .with_password(Role::Admin, "admin-pw");
            let registry = Registry::in_memory(Arc::new(CoreConfig::default()));
            let app = router(AppState::new(registry, keys.clone(), credentials));
            Self { app, keys }
        }

        fn token(&self, role: Role) -> String {
            self.keys.issue(role).unwrap().token
        }

        async fn send(
            &self,
            method: &str,
            uri: &str,
            role: Option<Role>,
            body: Option<Value>,
        ) -> (StatusCode, Value) {
            let mut request = Request::builder().method(method).uri(uri);
            if let Some(role) = role {
                request = request.header("authorization", format!("Bearer {}", self.token(role)));
            }
            let request = match body {
                Some(body) => request
                    .header("content-type", "application/json")
                    .body(Body::from(body.to_string()))
                    .unwrap(),
                None => request.body(Body::empty()).unwrap(),
            };

            let response = self.app.clone().oneshot(request).await.unwrap();
            let status = response.status();
            let bytes = response.into_body().collect().await.unwrap().to_bytes();
            let value = if bytes.is_empty() {
                Value::Null
            } else {
                serde_json::from_slice(&bytes).unwrap()
            };
            (status, value)
        }

        async fn register(&self, cr: &str, labid: &str, date: &str) {
            let (status, body) = self
                .send(
                    "POST",
                    "/api/patients",
                    Some(Role::Resident),
                    Some(json!({
                        "cr": cr,
                        "labid": labid,
                        "date": date,
                        "name": "Ravi Kumar",
                        "age": "54",
                        "sex": "M",
                        "faculty": "Haematology",
                        "sample": "Bone marrow",
                    })),
                )
                .await;
            assert_eq!(status, StatusCode::OK, "{body}");
        }

        async fn order(&self, lab: &str, cr: &str, labid: &str, panels: &str) {
            let (status, body) = self
                .send(
                    "POST",
                    &format!("/api/orders/{lab}"),
                    Some(Role::Resident),
                    Some(json!({ "cr": cr, "labid": labid, "panels": panels })),
                )
                .await;
            assert_eq!(status, StatusCode::OK, "{body}");
        }
    }

    #[tokio::test]
    async fn ping_needs_no_session() {
        let app = TestApp::new();
        let (status, body) = app.send("GET", "/api/ping", None, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["ok"], true);
    }

    #[tokio::test]
    async fn login_outcomes() {
        let app = TestApp::new();

        let (status, body) = app
            .send(
                "POST",
                "/api/auth/login",
                None,
                Some(json!({ "role": "resident", "password": "resident-pw" })),
            )
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["role"], "resident");
        let token = body["token"].as_str().unwrap();
        assert_eq!(app.keys.verify(token).unwrap().role, Role::Resident);

        let (status, body) = app
            .send(
                "POST",
                "/api/auth/login",
                None,
                Some(json!({ "role": "resident", "password": "wrong" })),
            )
            .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["error"], "Incorrect password");

        let (status, _) = app
            .send(
                "POST",
                "/api/auth/login",
                None,
                Some(json!({ "role": "fish", "password": "anything" })),
            )
            .await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);

        let (status, body) = app
            .send(
                "POST",
                "/api/auth/login",
                None,
                Some(json!({ "role": "root", "password": "x" })),
            )
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "Invalid role");

        let (status, body) = app
            .send("POST", "/api/auth/login", None, Some(json!({ "role": "admin" })))
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "role and password are required");
    }

    #[tokio::test]
    async fn missing_and_invalid_tokens_are_unauthorized() {
        let app = TestApp::new();
        let (status, body) = app.send("GET", "/api/search?q=ravi", None, None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["error"], "No token provided");

        let request = Request::builder()
            .uri("/api/search?q=ravi")
            .header("authorization", "Bearer not.a.token")
            .body(Body::empty())
            .unwrap();
        let response = app.app.clone().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn numeric_age_is_accepted() {
        let app = TestApp::new();
        let (status, body) = app
            .send(
                "POST",
                "/api/patients",
                Some(Role::Resident),
                Some(json!({
                    "cr": "000000000009",
                    "labid": "A_9_2024",
                    "date": "2024-02-01",
                    "name": "Meera Das",
                    "age": 52,
                    "sex": "F",
                    "faculty": "Haematology",
                    "sample": "Peripheral blood",
                    "tlc": 11.2,
                })),
            )
            .await;
        assert_eq!(status, StatusCode::OK, "{body}");

        let (_, body) = app
            .send("GET", "/api/patients/000000000009", Some(Role::Consultant), None)
            .await;
        assert_eq!(body["visits"][0]["age"], "52");
        assert_eq!(body["visits"][0]["tlc"], "11.2");
    }

    #[tokio::test]
    async fn malformed_bodies_are_bad_requests() {
        let app = TestApp::new();

        let request = Request::builder()
            .method("POST")
            .uri("/api/patients")
            .header("authorization", format!("Bearer {}", app.token(Role::Resident)))
            .header("content-type", "application/json")
            .body(Body::from("{\"cr\": \"000000000001\","))
            .unwrap();
        let response = app.app.clone().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let body: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["error"], "Invalid request body");
        assert_eq!(body["all_errors"].as_array().map(Vec::len), Some(1));

        let (status, body) = app
            .send(
                "POST",
                "/api/patients",
                Some(Role::Resident),
                Some(json!({ "cr": "000000000001", "age": { "years": 52 } })),
            )
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "Invalid request body");

        let request = Request::builder()
            .method("POST")
            .uri("/api/auth/login")
            .body(Body::from("role=admin"))
            .unwrap();
        let response = app.app.clone().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn registration_round_trips_through_load_all() {
        let app = TestApp::new();
        app.register("000000000001", "A_100_2024", "2024-01-01").await;
        app.register("000000000001", "A_200_2024", "2024-06-01").await;

        let (status, body) = app
            .send("GET", "/api/patients/000000000001", Some(Role::Consultant), None)
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["visits"].as_array().unwrap().len(), 2);
        assert_eq!(body["visits"][0]["name"], "Ravi Kumar");
        assert_eq!(body["activeVisitId"], "A_200_2024");

        let (status, _) = app
            .send("GET", "/api/patients/000000000009", Some(Role::Admin), None)
            .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn invalid_registration_reports_every_error() {
        let app = TestApp::new();
        let (status, body) = app
            .send(
                "POST",
                "/api/patients",
                Some(Role::Resident),
                Some(json!({ "cr": "123", "labid": "A_100_2026" })),
            )
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        let all = body["all_errors"].as_array().unwrap();
        assert!(all.len() > 1);
        assert_eq!(body["error"], all[0]);
    }

    #[tokio::test]
    async fn consultant_cannot_register() {
        let app = TestApp::new();
        let (status, _) = app
            .send(
                "POST",
                "/api/patients",
                Some(Role::Consultant),
                Some(json!({ "cr": "000000000001" })),
            )
            .await;
        assert_eq!(status, StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn duplicate_accession_is_a_conflict_naming_the_owner() {
        let app = TestApp::new();
        app.register("000000000001", "A_100_2026", "2026-01-05").await;
        app.register("000000000002", "A_101_2026", "2026-01-05").await;
        app.order("fish", "000000000001", "A_100_2026", "CLL").await;

        let (status, body) = app
            .send(
                "POST",
                "/api/acceptance/fish",
                Some(Role::Fish),
                Some(json!({ "cr": "000000000001", "labid": "A_100_2026", "uniqueLabId": "X1" })),
            )
            .await;
        assert_eq!(status, StatusCode::OK, "{body}");
        assert_eq!(body["locked"], true);
        assert_eq!(body["lockedBy"], "fish");

        let (status, body) = app
            .send(
                "POST",
                "/api/acceptance/fish",
                Some(Role::Fish),
                Some(json!({ "cr": "000000000002", "labid": "A_101_2026", "uniqueLabId": "X1" })),
            )
            .await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert!(body["error"].as_str().unwrap().contains("000000000001"));
    }

    #[tokio::test]
    async fn locked_results_answer_423_until_unlocked() {
        let app = TestApp::new();
        app.register("000000000001", "A_100_2026", "2026-01-05").await;
        let visit = json!({ "cr": "000000000001", "labid": "A_100_2026" });

        let (status, body) = app
            .send("POST", "/api/results/fcm", Some(Role::Fcm), Some(visit.clone()))
            .await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(body["error"], "FCM acceptance must be completed first");

        let (status, _) = app
            .send("POST", "/api/acceptance/fcm", Some(Role::Fcm), Some(visit.clone()))
            .await;
        assert_eq!(status, StatusCode::OK);

        let results = json!({
            "cr": "000000000001",
            "labid": "A_100_2026",
            "panelResults": { "CD34": "12%" },
        });
        let (status, _) = app
            .send("POST", "/api/results/fcm", Some(Role::Fcm), Some(results.clone()))
            .await;
        assert_eq!(status, StatusCode::OK);

        let (status, body) = app
            .send("POST", "/api/results/fcm", Some(Role::Fcm), Some(results.clone()))
            .await;
        assert_eq!(status, StatusCode::LOCKED);
        assert_eq!(body["locked"], true);

        let (status, _) = app
            .send(
                "POST",
                "/api/results/fcm/unlock",
                Some(Role::Fcm),
                Some(visit.clone()),
            )
            .await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (status, body) = app
            .send(
                "POST",
                "/api/results/fcm/unlock",
                Some(Role::Admin),
                Some(json!({ "cr": "000000000001", "labid": "A_100_2026", "reason": "typo" })),
            )
            .await;
        assert_eq!(status, StatusCode::OK, "{body}");

        let (status, _) = app
            .send("POST", "/api/results/fcm", Some(Role::Fcm), Some(results))
            .await;
        assert_eq!(status, StatusCode::OK);

        let (status, body) = app
            .send("GET", "/api/admin/unlocks", Some(Role::Admin), None)
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body.as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn lab_role_cannot_write_another_lab() {
        let app = TestApp::new();
        app.register("000000000001", "A_100_2026", "2026-01-05").await;
        let (status, body) = app
            .send(
                "POST",
                "/api/results/fcm",
                Some(Role::Fish),
                Some(json!({ "cr": "000000000001", "labid": "A_100_2026" })),
            )
            .await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(body["error"], "Role 'fish' can only write FISH records");
    }

    #[tokio::test]
    async fn unknown_lab_and_route() {
        let app = TestApp::new();
        let (status, body) = app
            .send("GET", "/api/orders/xray", Some(Role::Fish), None)
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "Invalid lab: xray");

        let (status, body) = app.send("GET", "/api/nowhere", None, None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"], "Route not found: GET /api/nowhere");
    }

    #[tokio::test]
    async fn export_requires_a_date_range() {
        let app = TestApp::new();
        let (status, body) = app
            .send("GET", "/api/results/fish?from=2026-01-01", Some(Role::Admin), None)
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "from and to date params required");

        let (status, body) = app
            .send(
                "GET",
                "/api/results/fish?from=2026-01-01&to=2026-12-31",
                Some(Role::Admin),
                None,
            )
            .await;
        assert_eq!(status, StatusCode::OK);
        assert!(body.as_array().unwrap().is_empty());
    }

    #[test]
    fn openapi_lists_every_route() {
        let doc = ApiDoc::openapi();
        assert!(doc.paths.paths.contains_key("/api/acceptance/{lab}"));
        assert!(doc.paths.paths.contains_key("/api/admin/locks/{cr}/{labid}"));
    }
}
