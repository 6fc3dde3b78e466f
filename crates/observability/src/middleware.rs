//! HTTP-Middleware fuer Axum
//!
//! - Request-Timing: misst die Antwortzeit jeder Anfrage, loggt sie und
//!   traegt sie in die Prometheus-Histogramme ein
//! - Sicherheits-Header: setzt CSP und Co. auf jede Antwort

use axum::{
    body::Body,
    extract::{MatchedPath, State},
    http::{header, HeaderName, HeaderValue, Request, Response},
    middleware::Next,
};
use std::time::Instant;

use crate::metrics::TafelMetrics;

/// Content-Security-Policy fuer die ausgelieferte Tafel-Oberflaeche
pub const CONTENT_SECURITY_POLICY: &str = "default-src 'self' 'unsafe-inline' 'unsafe-eval'; \
     script-src 'self' 'unsafe-inline' 'unsafe-eval'; \
     style-src 'self' 'unsafe-inline'; \
     connect-src 'self' ws: wss: *; \
     img-src 'self' data: blob:; \
     worker-src 'self' blob:;";

/// Erstellt den Tracing-Layer fuer HTTP-Anfragen (Span pro Request)
pub fn request_timing_layer() -> tower_http::trace::TraceLayer<
    tower_http::classify::SharedClassifier<tower_http::classify::ServerErrorsAsFailures>,
> {
    use tower_http::trace::TraceLayer;
    TraceLayer::new_for_http()
}

/// Axum-Middleware-Funktion: misst Antwortzeit, loggt und zaehlt.
///
/// Als `route_layer` einhaengen, damit `MatchedPath` verfuegbar ist und
/// Raum-IDs nicht als Label-Werte landen:
/// ```ignore
/// Router::new()
///     .route("/", get(handler))
///     .route_layer(axum::middleware::from_fn_with_state(metriken, timing_middleware))
/// ```
pub async fn timing_middleware(
    State(metriken): State<TafelMetrics>,
    req: Request<Body>,
    next: Next,
) -> Response<Body> {
    let methode = req.method().to_string();
    let pfad = req
        .extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_owned())
        .unwrap_or_else(|| "unbekannt".to_owned());
    let start = Instant::now();

    let response = next.run(req).await;

    let dauer = start.elapsed();
    let status = response.status().as_u16();

    metriken
        .http_requests_total
        .with_label_values(&[methode.as_str(), pfad.as_str(), &status.to_string()])
        .inc();
    metriken
        .http_request_duration_seconds
        .with_label_values(&[methode.as_str(), pfad.as_str()])
        .observe(dauer.as_secs_f64());

    tracing::info!(
        method = %methode,
        path = %pfad,
        status = status,
        duration_ms = dauer.as_millis(),
        "HTTP-Anfrage abgeschlossen"
    );

    response
}

/// Axum-Middleware-Funktion: setzt die Sicherheits-Header
pub async fn sicherheits_header(req: Request<Body>, next: Next) -> Response<Body> {
    let mut response = next.run(req).await;
    let headers = response.headers_mut();
    headers.insert(
        header::CONTENT_SECURITY_POLICY,
        HeaderValue::from_static(CONTENT_SECURITY_POLICY),
    );
    headers.insert(
        header::X_CONTENT_TYPE_OPTIONS,
        HeaderValue::from_static("nosniff"),
    );
    headers.insert(header::X_FRAME_OPTIONS, HeaderValue::from_static("SAMEORIGIN"));
    headers.insert(
        HeaderName::from_static("x-xss-protection"),
        HeaderValue::from_static("1; mode=block"),
    );
    response
}
