// Web server - HTML pages and JSON API with Axum
//
// Everything except /login and /api/health sits behind the `sesion` cookie.

use axum::{
    body::Body,
    extract::{DefaultBodyLimit, Multipart, Path, Query, Request, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    middleware::{self, Next},
    response::{Html, IntoResponse, Redirect, Response},
    routing::{get, post},
    Extension, Form, Json, Router,
};
use anyhow::Context;
use chrono::Local;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::path::PathBuf;
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::services::ServeFile;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use crate::audit::{self, Event};
use crate::auth::{SessionStore, UserDirectory, MSG_BAD_CREDENTIALS};
use crate::config::Settings;
use crate::dashboard::{search, summarize, DashboardSummary};
use crate::error::ExtractionError;
use crate::extraction::ExtractionRecord;
use crate::ledger::{LedgerState, EXPORT_FILE_NAME};
use crate::pages;
use crate::pipeline::Pipeline;

pub const SESSION_COOKIE: &str = "sesion";

/// Uploads above this size are rejected before reaching the pipeline
pub const MAX_UPLOAD_BYTES: usize = 20 * 1024 * 1024;

pub const MSG_INVALID_JSON: &str = "⚠️ Error al interpretar la respuesta como JSON.";
const MSG_NO_FILE: &str = "Sube un archivo PDF para continuar.";

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<Pipeline>,
    pub users: Arc<UserDirectory>,
    pub sessions: SessionStore,
    pub logo_path: PathBuf,
}

impl AppState {
    pub fn new(settings: &Settings, pipeline: Pipeline) -> Self {
        Self {
            pipeline: Arc::new(pipeline),
            users: Arc::new(settings.users.clone()),
            sessions: SessionStore::new(),
            logo_path: settings.logo_path.clone(),
        }
    }

    fn logo_name(&self) -> Option<String> {
        if !self.logo_path.is_file() {
            return None;
        }
        self.logo_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
    }

    fn logo_href(&self) -> Option<String> {
        self.logo_name()
            .map(|name| format!("/static/{}", urlencoding::encode(&name)))
    }
}

/// Logged-in user, inserted by the session middleware
#[derive(Debug, Clone)]
pub struct CurrentUser(pub String);

/// API Response wrapper
#[derive(Serialize)]
pub struct ApiResponse<T> {
    success: bool,
    data: T,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl<T> ApiResponse<T> {
    fn ok(data: T) -> Self {
        Self {
            success: true,
            data,
            error: None,
        }
    }

    fn failed(data: T, error: impl Into<String>) -> Self {
        Self {
            success: false,
            data,
            error: Some(error.into()),
        }
    }
}

#[derive(Deserialize)]
pub struct LoginForm {
    usuario: String,
    contrasena: String,
}

#[derive(Deserialize, Default)]
pub struct SearchQuery {
    #[serde(default)]
    q: String,
}

// ============================================================================
// Router
// ============================================================================

pub fn build_router(state: AppState) -> Router {
    let protected = Router::new()
        .route("/logout", post(logout))
        .route("/procesar", get(upload_form).post(process_upload))
        .route("/dashboard", get(dashboard))
        .route("/descargas/csv", get(download_csv))
        .route("/reportes/:archivo", get(download_report))
        .route("/api/registros", get(api_records))
        .route("/api/dashboard", get(api_dashboard))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            require_session,
        ));

    let mut app = Router::new()
        .route("/", get(index))
        .route("/login", get(login_form).post(login))
        .route("/api/health", get(health_check))
        .merge(protected);

    if let Some(name) = state.logo_name() {
        app = app.route_service(
            &format!("/static/{}", name),
            ServeFile::new(&state.logo_path),
        );
    }

    app.layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive()),
        )
        .with_state(state)
}

fn session_token(headers: &HeaderMap) -> Option<String> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, _)| *name == SESSION_COOKIE)
        .map(|(_, token)| token.to_string())
}

fn current_user(state: &AppState, headers: &HeaderMap) -> Option<String> {
    session_token(headers).and_then(|token| state.sessions.user_for(&token))
}

async fn require_session(State(state): State<AppState>, mut request: Request, next: Next) -> Response {
    match current_user(&state, request.headers()) {
        Some(usuario) => {
            request.extensions_mut().insert(CurrentUser(usuario));
            next.run(request).await
        }
        None if request.uri().path().starts_with("/api/") => (
            StatusCode::UNAUTHORIZED,
            Json(ApiResponse::failed((), "Sesión requerida")),
        )
            .into_response(),
        None => Redirect::to("/login").into_response(),
    }
}

// ============================================================================
// Session handlers
// ============================================================================

/// GET / - Send the visitor where they belong
async fn index(State(state): State<AppState>, headers: HeaderMap) -> Redirect {
    match current_user(&state, &headers) {
        Some(_) => Redirect::to("/procesar"),
        None => Redirect::to("/login"),
    }
}

/// GET /login
async fn login_form() -> Html<String> {
    Html(pages::login_page(None))
}

/// POST /login
async fn login(State(state): State<AppState>, Form(form): Form<LoginForm>) -> Response {
    let usuario = form.usuario.trim();

    if !state.users.verify(usuario, &form.contrasena) {
        warn!(usuario = %usuario, "Login rejected");
        state.pipeline.record_event(Event::new(
            audit::LOGIN_FAILED,
            "usuario",
            usuario,
            json!({}),
            "anonimo",
        ));
        return (
            StatusCode::UNAUTHORIZED,
            Html(pages::login_page(Some(MSG_BAD_CREDENTIALS))),
        )
            .into_response();
    }

    let token = state.sessions.login(usuario);
    info!(usuario = %usuario, "Session started");
    state.pipeline.record_event(Event::new(
        audit::LOGIN_SUCCEEDED,
        "usuario",
        usuario,
        json!({}),
        usuario,
    ));

    let cookie = format!(
        "{}={}; Path=/; HttpOnly; SameSite=Lax",
        SESSION_COOKIE, token
    );
    (
        [(header::SET_COOKIE, cookie)],
        Redirect::to("/procesar"),
    )
        .into_response()
}

/// POST /logout
async fn logout(State(state): State<AppState>, headers: HeaderMap) -> Response {
    if let Some(usuario) = session_token(&headers).and_then(|t| state.sessions.logout(&t)) {
        info!(usuario = %usuario, "Session closed");
        state.pipeline.record_event(Event::new(
            audit::LOGOUT,
            "usuario",
            &usuario,
            json!({}),
            &usuario,
        ));
    }

    let cookie = format!("{}=; Path=/; HttpOnly; Max-Age=0", SESSION_COOKIE);
    ([(header::SET_COOKIE, cookie)], Redirect::to("/login")).into_response()
}

// ============================================================================
// Processing
// ============================================================================

/// GET /procesar
async fn upload_form(
    State(state): State<AppState>,
    Extension(CurrentUser(usuario)): Extension<CurrentUser>,
) -> Html<String> {
    Html(pages::upload_page(&usuario, state.logo_href().as_deref()))
}

/// PDF parsing, CSV writes, lopdf rendering and rusqlite stay off the async workers.
async fn blocking<T, F>(work: F) -> anyhow::Result<T>
where
    F: FnOnce() -> anyhow::Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .context("Background task failed")?
}

/// First non-empty `documento` part of the form.
async fn read_upload(multipart: &mut Multipart) -> anyhow::Result<Option<(String, Vec<u8>)>> {
    while let Some(field) = multipart.next_field().await? {
        if field.name() != Some("documento") {
            continue;
        }

        let file_name = field.file_name().unwrap_or("documento.pdf").to_string();
        let bytes = field.bytes().await?;
        if bytes.is_empty() {
            return Ok(None);
        }
        return Ok(Some((file_name, bytes.to_vec())));
    }
    Ok(None)
}

/// POST /procesar - Run the whole pipeline on the uploaded statement
async fn process_upload(
    State(state): State<AppState>,
    Extension(CurrentUser(usuario)): Extension<CurrentUser>,
    mut multipart: Multipart,
) -> Response {
    let error_page = |status: StatusCode, html: String| (status, Html(html)).into_response();

    let (file_name, bytes) = match read_upload(&mut multipart).await {
        Ok(Some(upload)) => upload,
        Ok(None) => {
            return error_page(
                StatusCode::BAD_REQUEST,
                pages::processing_error_page(&usuario, None, MSG_NO_FILE, None),
            )
        }
        Err(e) => {
            warn!(error = %e, "Malformed upload");
            return error_page(
                StatusCode::BAD_REQUEST,
                pages::processing_error_page(&usuario, None, &format!("❌ {}", e), None),
            );
        }
    };

    let pipeline = state.pipeline.clone();
    let read = blocking(move || pipeline.read_document(&file_name, &bytes)).await;
    let document = match read {
        Ok(document) => document,
        Err(e) => {
            return error_page(
                StatusCode::UNPROCESSABLE_ENTITY,
                pages::processing_error_page(&usuario, None, &format!("❌ {:#}", e), None),
            )
        }
    };

    let fecha = Local::now().date_naive();
    let result = match state.pipeline.extract(&document, fecha, &usuario).await {
        Ok(extraction) => {
            let pipeline = state.pipeline.clone();
            let (doc, actor) = (document.clone(), usuario.clone());
            blocking(move || pipeline.persist(&doc, extraction, &actor)).await
        }
        Err(e) => Err(e),
    };

    match result {
        Ok(outcome) => {
            let report_href = format!(
                "/reportes/{}",
                urlencoding::encode(&outcome.report_file_name())
            );
            let report_html = state.pipeline.reports().render_html(&outcome.record);
            Html(pages::result_page(&usuario, &document, &report_html, &report_href))
                .into_response()
        }
        Err(e) => {
            let raw = e
                .downcast_ref::<ExtractionError>()
                .and_then(|err| err.raw_response());

            let page = match raw {
                Some(raw) => pages::processing_error_page(
                    &usuario,
                    Some(&document),
                    MSG_INVALID_JSON,
                    Some(raw),
                ),
                None => pages::processing_error_page(
                    &usuario,
                    Some(&document),
                    &format!("❌ {:#}", e),
                    None,
                ),
            };
            let status = if raw.is_some() {
                StatusCode::UNPROCESSABLE_ENTITY
            } else {
                StatusCode::BAD_GATEWAY
            };
            error_page(status, page)
        }
    }
}

// ============================================================================
// Dashboard and downloads
// ============================================================================

/// GET /dashboard?q=
async fn dashboard(
    State(state): State<AppState>,
    Extension(CurrentUser(usuario)): Extension<CurrentUser>,
    Query(query): Query<SearchQuery>,
) -> Response {
    match state.pipeline.ledger().load() {
        Ok(ledger) => Html(pages::dashboard_page(&usuario, &ledger, query.q.trim())).into_response(),
        Err(e) => {
            error!(error = %e, "Could not read extraction log");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Html(pages::processing_error_page(&usuario, None, &format!("❌ {:#}", e), None)),
            )
                .into_response()
        }
    }
}

fn attachment(file_name: &str, content_type: &'static str, bytes: Vec<u8>) -> Response {
    let disposition = format!("attachment; filename=\"{}\"", file_name.replace('"', ""));
    let mut response = Response::new(Body::from(bytes));
    let headers = response.headers_mut();
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static(content_type));
    if let Ok(value) = HeaderValue::from_str(&disposition) {
        headers.insert(header::CONTENT_DISPOSITION, value);
    }
    response
}

/// GET /descargas/csv - The whole extraction log
async fn download_csv(State(state): State<AppState>) -> Response {
    match state.pipeline.ledger().export_bytes() {
        Ok(bytes) => attachment(EXPORT_FILE_NAME, "text/csv; charset=utf-8", bytes),
        Err(e) => {
            warn!(error = %e, "CSV download failed");
            (StatusCode::NOT_FOUND, "Aún no hay registros").into_response()
        }
    }
}

/// GET /reportes/:archivo - A generated PDF
async fn download_report(State(state): State<AppState>, Path(archivo): Path<String>) -> Response {
    let Some(path) = state.pipeline.reports().resolve(&archivo) else {
        return (StatusCode::NOT_FOUND, "Reporte no encontrado").into_response();
    };

    match tokio::fs::read(&path).await {
        Ok(bytes) => attachment(&archivo, "application/pdf", bytes),
        Err(e) => {
            error!(path = %path.display(), error = %e, "Could not read report");
            (StatusCode::INTERNAL_SERVER_ERROR, "No se pudo leer el reporte").into_response()
        }
    }
}

// ============================================================================
// API Handlers
// ============================================================================

/// GET /api/health - Health check
async fn health_check() -> impl IntoResponse {
    Json(ApiResponse::ok("OK"))
}

fn load_records(state: &AppState) -> anyhow::Result<Vec<ExtractionRecord>> {
    Ok(match state.pipeline.ledger().load()? {
        LedgerState::Missing => Vec::new(),
        LedgerState::Records(records) => records,
    })
}

/// GET /api/registros?q= - Logged extractions, optionally filtered
async fn api_records(State(state): State<AppState>, Query(query): Query<SearchQuery>) -> Response {
    match load_records(&state) {
        Ok(records) => {
            let matching: Vec<ExtractionRecord> =
                search(&records, query.q.trim()).into_iter().cloned().collect();
            (StatusCode::OK, Json(ApiResponse::ok(matching))).into_response()
        }
        Err(e) => {
            error!(error = %e, "Error getting records");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ApiResponse::failed(Vec::<ExtractionRecord>::new(), e.to_string())),
            )
                .into_response()
        }
    }
}

/// GET /api/dashboard - Indicators and chart series
async fn api_dashboard(State(state): State<AppState>) -> Response {
    match load_records(&state) {
        Ok(records) => {
            let summary: DashboardSummary = summarize(&records);
            (StatusCode::OK, Json(ApiResponse::ok(summary))).into_response()
        }
        Err(e) => {
            error!(error = %e, "Error building dashboard");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ApiResponse::failed(summarize(&[]), e.to_string())),
            )
                .into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::tests::{test_pipeline, test_settings, REPLY};
    use axum::http::Request as HttpRequest;
    use tower::ServiceExt;

    const BOUNDARY: &str = "X-RESUMEN-BOUNDARY";

    fn app(dir: &std::path::Path, reply: &str) -> Router {
        let settings = test_settings(dir);
        build_router(AppState::new(&settings, test_pipeline(dir, reply)))
    }

    async fn body_text(response: Response) -> String {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    fn get_with(uri: &str, cookie: Option<&str>) -> HttpRequest<Body> {
        let mut builder = HttpRequest::builder().uri(uri);
        if let Some(cookie) = cookie {
            builder = builder.header(header::COOKIE, cookie);
        }
        builder.body(Body::empty()).unwrap()
    }

    fn login_request(usuario: &str, contrasena: &str) -> HttpRequest<Body> {
        HttpRequest::builder()
            .method("POST")
            .uri("/login")
            .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(Body::from(format!("usuario={}&contrasena={}", usuario, contrasena)))
            .unwrap()
    }

    fn upload_request(cookie: &str, file_name: &str, contents: &str) -> HttpRequest<Body> {
        let body = format!(
            "--{b}\r\nContent-Disposition: form-data; name=\"documento\"; filename=\"{f}\"\r\nContent-Type: text/plain\r\n\r\n{c}\r\n--{b}--\r\n",
            b = BOUNDARY,
            f = file_name,
            c = contents
        );
        HttpRequest::builder()
            .method("POST")
            .uri("/procesar")
            .header(header::COOKIE, cookie)
            .header(
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={}", BOUNDARY),
            )
            .body(Body::from(body))
            .unwrap()
    }

    async fn login_cookie(app: &Router) -> String {
        let response = app
            .clone()
            .oneshot(login_request("admin", "ninja1929"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::SEE_OTHER);

        let set_cookie = response
            .headers()
            .get(header::SET_COOKIE)
            .unwrap()
            .to_str()
            .unwrap();
        set_cookie.split(';').next().unwrap().to_string()
    }

    #[test]
    fn test_session_token_parsing() {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::COOKIE,
            HeaderValue::from_static("tema=oscuro; sesion=abc-123"),
        );
        assert_eq!(session_token(&headers), Some("abc-123".to_string()));
        assert_eq!(session_token(&HeaderMap::new()), None);
    }

    #[tokio::test]
    async fn test_health_is_public() {
        let dir = tempfile::tempdir().unwrap();
        let response = app(dir.path(), REPLY)
            .oneshot(get_with("/api/health", None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(body_text(response).await.contains("\"success\":true"));
    }

    #[tokio::test]
    async fn test_protected_routes_require_session() {
        let dir = tempfile::tempdir().unwrap();
        let app = app(dir.path(), REPLY);

        let page = app.clone().oneshot(get_with("/procesar", None)).await.unwrap();
        assert_eq!(page.status(), StatusCode::SEE_OTHER);
        assert_eq!(page.headers()[header::LOCATION], "/login");

        let api = app
            .clone()
            .oneshot(get_with("/api/registros", Some("sesion=inventada")))
            .await
            .unwrap();
        assert_eq!(api.status(), StatusCode::UNAUTHORIZED);

        let root = app.oneshot(get_with("/", None)).await.unwrap();
        assert_eq!(root.headers()[header::LOCATION], "/login");
    }

    #[tokio::test]
    async fn test_bad_credentials() {
        let dir = tempfile::tempdir().unwrap();
        let response = app(dir.path(), REPLY)
            .oneshot(login_request("admin", "incorrecta"))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert!(response.headers().get(header::SET_COOKIE).is_none());
        assert!(body_text(response).await.contains(MSG_BAD_CREDENTIALS));
    }

    #[tokio::test]
    async fn test_login_process_and_download() {
        let dir = tempfile::tempdir().unwrap();
        let app = app(dir.path(), REPLY);
        let cookie = login_cookie(&app).await;

        let form = app
            .clone()
            .oneshot(get_with("/procesar", Some(&cookie)))
            .await
            .unwrap();
        assert_eq!(form.status(), StatusCode::OK);
        assert!(body_text(form).await.contains("Sesión iniciada como: admin"));

        let result = app
            .clone()
            .oneshot(upload_request(&cookie, "estado.txt", "SALDO AL CORTE $4,500.00"))
            .await
            .unwrap();
        assert_eq!(result.status(), StatusCode::OK);
        let html = body_text(result).await;
        assert!(html.contains("✅ Datos extraídos por IA:"));
        assert!(html.contains("$4,500.00"));
        assert!(html.contains("<section class=\"reporte\">"));
        assert!(html.contains("<tr><td><strong>Saldo</strong></td><td>$4,500.00</td></tr>"));
        assert!(html.contains("/reportes/resumen_Ana_Ruiz.pdf"));

        let records = app
            .clone()
            .oneshot(get_with("/api/registros?q=ruaa", Some(&cookie)))
            .await
            .unwrap();
        let json: serde_json::Value = serde_json::from_str(&body_text(records).await).unwrap();
        assert_eq!(json["data"].as_array().unwrap().len(), 1);
        assert_eq!(json["data"][0]["riesgos"], "Pagos mínimos");

        let csv = app
            .clone()
            .oneshot(get_with("/descargas/csv", Some(&cookie)))
            .await
            .unwrap();
        assert_eq!(csv.headers()[header::CONTENT_TYPE], "text/csv; charset=utf-8");
        assert!(body_text(csv).await.starts_with("nombre,rfc,cuenta"));

        let pdf = app
            .clone()
            .oneshot(get_with("/reportes/resumen_Ana_Ruiz.pdf", Some(&cookie)))
            .await
            .unwrap();
        assert_eq!(pdf.status(), StatusCode::OK);
        assert_eq!(pdf.headers()[header::CONTENT_TYPE], "application/pdf");

        let dashboard = app
            .oneshot(get_with("/api/dashboard", Some(&cookie)))
            .await
            .unwrap();
        let json: serde_json::Value = serde_json::from_str(&body_text(dashboard).await).unwrap();
        assert_eq!(json["data"]["documentos"], 1);
        assert_eq!(json["data"]["suma_saldos"], 4500.0);
    }

    #[tokio::test]
    async fn test_invalid_json_shows_raw_reply() {
        let dir = tempfile::tempdir().unwrap();
        let app = app(dir.path(), "Lo siento, no puedo ayudar.");
        let cookie = login_cookie(&app).await;

        let response = app
            .oneshot(upload_request(&cookie, "estado.txt", "texto"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);

        let html = body_text(response).await;
        assert!(html.contains(MSG_INVALID_JSON));
        assert!(html.contains("Lo siento, no puedo ayudar."));
    }

    #[tokio::test]
    async fn test_report_names_stay_in_folder() {
        let dir = tempfile::tempdir().unwrap();
        let app = app(dir.path(), REPLY);
        let cookie = login_cookie(&app).await;

        let response = app
            .oneshot(get_with("/reportes/..%2Flog.csv", Some(&cookie)))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_logout_ends_session() {
        let dir = tempfile::tempdir().unwrap();
        let app = app(dir.path(), REPLY);
        let cookie = login_cookie(&app).await;

        let logout = HttpRequest::builder()
            .method("POST")
            .uri("/logout")
            .header(header::COOKIE, &cookie)
            .body(Body::empty())
            .unwrap();
        let response = app.clone().oneshot(logout).await.unwrap();
        assert_eq!(response.headers()[header::LOCATION], "/login");

        let page = app.oneshot(get_with("/dashboard", Some(&cookie))).await.unwrap();
        assert_eq!(page.status(), StatusCode::SEE_OTHER);
    }
}
