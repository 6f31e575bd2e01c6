//! Access logging and optional Basic Auth for the metrics-facing HTTP
//! surfaces (the management surface has its own credential check in `mgmt`).

use std::future::Future;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Instant;

use axum::body::Body;
use axum::extract::{Request, State};
use axum::http::{StatusCode, header};
use axum::middleware::Next;
use tracing::{debug, info, warn};

/// Authenticated username, inserted into request extensions by
/// `basic_auth_middleware`, read back out by `AccessLogService`.
#[derive(Clone)]
pub(crate) struct AuthUser(pub(crate) String);

#[derive(Clone)]
pub(crate) struct AccessLogLayer;

impl<S> tower::Layer<S> for AccessLogLayer {
    type Service = AccessLogService<S>;
    fn layer(&self, inner: S) -> Self::Service {
        AccessLogService { inner }
    }
}

#[derive(Clone)]
pub(crate) struct AccessLogService<S> {
    inner: S,
}

impl<S> tower::Service<Request> for AccessLogService<S>
where
    S: tower::Service<Request, Response = axum::response::Response> + Clone + Send + 'static,
    S::Future: Send,
{
    type Response = axum::response::Response;
    type Error = S::Error;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Request) -> Self::Future {
        let method = req.method().clone();
        let path = req.uri().path().to_owned();
        let client = req
            .extensions()
            .get::<axum::extract::ConnectInfo<SocketAddr>>()
            .map(|ci| ci.0.ip().to_string())
            .unwrap_or_else(|| "-".to_owned());
        let user = req.extensions().get::<AuthUser>().map(|u| u.0.clone()).unwrap_or_else(|| "-".to_owned());
        let t0 = Instant::now();

        let mut inner = self.inner.clone();
        Box::pin(async move {
            let response = inner.call(req).await?;
            let latency_ms = t0.elapsed().as_millis() as u64;
            let status = response.status().as_u16();
            info!(client, user, status, latency_ms, "{method} {path}");
            Ok(response)
        })
    }
}

fn unauthorized() -> axum::response::Response {
    axum::response::Response::builder()
        .status(StatusCode::UNAUTHORIZED)
        .header(header::WWW_AUTHENTICATE, "Basic realm=\"pgscope\"")
        .body(Body::from("Unauthorized"))
        .unwrap()
}

/// Optional Basic Auth gate for the metrics/bridge surfaces — distinct from
/// the management surface's own credential check, and configured
/// independently (`--auth-user`/`--auth-password`, not `pgscope.toml`).
pub(crate) async fn basic_auth_middleware(State(creds): State<Arc<(String, String)>>, mut req: Request, next: Next) -> axum::response::Response {
    let path = req.uri().path().to_owned();

    let auth_header = match req.headers().get(header::AUTHORIZATION) {
        Some(v) => v,
        None => {
            warn!(path = %path, "auth failed: no authorization header");
            return unauthorized();
        }
    };

    let auth_str = match auth_header.to_str() {
        Ok(s) => s,
        Err(_) => {
            warn!(path = %path, "auth failed: invalid header encoding");
            return unauthorized();
        }
    };

    let Some(encoded) = auth_str.strip_prefix("Basic ") else {
        warn!(path = %path, "auth failed: not basic auth");
        return unauthorized();
    };

    use base64::Engine;
    let decoded = match base64::engine::general_purpose::STANDARD.decode(encoded) {
        Ok(d) => d,
        Err(_) => {
            warn!(path = %path, "auth failed: invalid base64");
            return unauthorized();
        }
    };

    let decoded_str = match String::from_utf8(decoded) {
        Ok(s) => s,
        Err(_) => {
            warn!(path = %path, "auth failed: invalid utf8");
            return unauthorized();
        }
    };

    let Some((user, pass)) = decoded_str.split_once(':') else {
        warn!(path = %path, "auth failed: malformed credentials");
        return unauthorized();
    };

    if user != creds.0 || pass != creds.1 {
        warn!(user = %user, path = %path, "auth failed: invalid credentials");
        return unauthorized();
    }

    debug!(user = %user, path = %path, "authenticated");
    req.extensions_mut().insert(AuthUser(user.to_owned()));
    next.run(req).await
}
