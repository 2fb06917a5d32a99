use crate::error::ServerError;
use crate::logging::ACCESS_LOG_TARGET;
use crate::state::ServerState;
use akapurge::{RequestSnapshot, ResponseSnapshot};
use axum::body::{to_bytes, Body, Bytes, HttpBody as _};
use axum::extract::{Request, State};
use axum::http::response::Parts;
use axum::middleware::Next;
use axum::response::Response;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Access log middleware
///
/// Buffers both bodies so templates can read them, then emits one record
/// with the elapsed time and every configured field that resolved.
///
/// A response body is only buffered when its exact length is known and
/// within the body limit. Anything else is streamed through untouched and
/// logged with an empty response body.
pub async fn access_log(
    State(state): State<Arc<ServerState>>,
    request: Request,
    next: Next,
) -> Result<Response, ServerError> {
    if !state.config.app.logs.show_access_logs {
        return Ok(next.run(request).await);
    }

    let started = Instant::now();
    let limit = state.config.app.server.max_body_size();

    let (parts, body) = request.into_parts();
    let body = to_bytes(body, limit)
        .await
        .map_err(|_| ServerError::PayloadTooLarge(limit))?;
    let request_snapshot = RequestSnapshot::from_parts(&parts, body.clone());

    let response = next.run(Request::from_parts(parts, Body::from(body))).await;
    let duration = started.elapsed();

    let (parts, body) = response.into_parts();
    let buffered = body
        .size_hint()
        .exact()
        .is_some_and(|len| len <= limit as u64);
    if !buffered {
        emit(&state, &request_snapshot, &parts, Bytes::new(), duration);
        return Ok(Response::from_parts(parts, body));
    }

    match to_bytes(body, limit).await {
        Ok(body) => {
            emit(&state, &request_snapshot, &parts, body.clone(), duration);
            Ok(Response::from_parts(parts, Body::from(body)))
        }
        Err(err) => {
            tracing::warn!(error = %err, "response body failed while buffering, access log skipped");
            let failed = futures::stream::once(async move { Err::<Bytes, _>(err) });
            Ok(Response::from_parts(parts, Body::from_stream(failed)))
        }
    }
}

fn emit(
    state: &ServerState,
    request: &RequestSnapshot,
    parts: &Parts,
    body: Bytes,
    duration: Duration,
) {
    let response = ResponseSnapshot::from_parts(parts, body);
    let fields = state.extractor.extract(request, &response);
    tracing::info!(
        target: ACCESS_LOG_TARGET,
        duration_ms = duration.as_secs_f64() * 1e3,
        fields = %fields,
        "request"
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServerConfig;
    use akapurge::{AppConfig, RequestSigner, SignError};
    use axum::http::StatusCode;
    use axum::middleware::from_fn_with_state;
    use axum::routing::get;
    use axum::Router;
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    struct NoSigner;

    #[async_trait::async_trait]
    impl RequestSigner for NoSigner {
        async fn sign(&self, _: reqwest::Request) -> Result<reqwest::Request, SignError> {
            Err(SignError::MissingCredential("client_secret"))
        }
    }

    fn router(handler: Router<Arc<ServerState>>) -> Router {
        let mut app = AppConfig::default();
        app.logs.show_access_logs = true;
        app.logs.access_logs_fields = vec!["${RESPONSE:status}".to_string()];
        let config = ServerConfig::from(app);
        let state =
            Arc::new(ServerState::new_with(config, Arc::new(NoSigner), Duration::ZERO).unwrap());
        handler
            .layer(from_fn_with_state(state.clone(), access_log))
            .with_state(state)
    }

    #[tokio::test]
    async fn streamed_bodies_pass_through() {
        let app = router(Router::new().route(
            "/stream",
            get(|| async {
                let chunks = futures::stream::iter(vec![
                    Ok::<_, std::io::Error>(Bytes::from_static(b"first,")),
                    Ok(Bytes::from_static(b"second")),
                ]);
                Body::from_stream(chunks)
            }),
        ));

        let response = app
            .oneshot(axum::http::Request::get("/stream").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = response.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(&body[..], b"first,second");
    }

    #[tokio::test]
    async fn failing_bodies_still_fail_for_the_client() {
        let app = router(Router::new().route(
            "/broken",
            get(|| async {
                let chunks = futures::stream::once(async {
                    Err::<Bytes, _>(std::io::Error::other("upstream reset"))
                });
                (StatusCode::ACCEPTED, Body::from_stream(chunks))
            }),
        ));

        let response = app
            .oneshot(axum::http::Request::get("/broken").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::ACCEPTED);
        assert!(response.into_body().collect().await.is_err());
    }
}
