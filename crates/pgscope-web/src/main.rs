mod auth;
mod background;
mod handlers;
mod logging;
mod mgmt;
mod state;
mod tls;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::process;
use std::sync::Arc;

use axum::Router;
use axum::routing::get;
use clap::Parser;
use pgscope_core::meta::LoggingCounters;
use tokio::sync::Notify;
use tower_http::cors::CorsLayer;
use tracing::{error, info};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use auth::{AccessLogLayer, basic_auth_middleware};
use logging::CountingLayer;
use state::AppState;

#[derive(Parser)]
#[command(name = "pgscope-web", about = "Prometheus exporter for PostgreSQL", version = pgscope_core::VERSION)]
struct Args {
    /// Path to pgscope.toml.
    #[arg(long, default_value = "pgscope.toml", env = "PGSCOPE_CONFIG")]
    config: PathBuf,

    /// Path to the master key file used to decrypt credentials in the
    /// configuration file. Omit to run with credentials stored in cleartext.
    #[arg(long, env = "PGSCOPE_MASTER_KEY_FILE")]
    master_key_file: Option<PathBuf>,

    /// Basic Auth username for the metrics and bridge surfaces. If set,
    /// --auth-password is also required. Independent of the management
    /// surface's own admin credentials.
    #[arg(long, env = "PGSCOPE_AUTH_USER")]
    auth_user: Option<String>,

    /// Basic Auth password for the metrics and bridge surfaces.
    #[arg(long, env = "PGSCOPE_AUTH_PASSWORD")]
    auth_password: Option<String>,
}

fn main() {
    let args = Args::parse();
    let logging = Arc::new(LoggingCounters::default());

    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "pgscope_web=info".parse().unwrap());
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .with(CountingLayer { counters: logging.clone() })
        .init();

    tokio::runtime::Builder::new_multi_thread().enable_all().build().expect("failed to build tokio runtime").block_on(async_main(args, logging));
}

async fn async_main(args: Args, logging: Arc<LoggingCounters>) {
    info!(version = pgscope_core::VERSION, config = %args.config.display(), "starting pgscope");

    let state = match AppState::load(args.config.clone(), args.master_key_file.clone(), logging.clone()) {
        Ok(state) => Arc::new(state),
        Err(e) => {
            // CONFIG_INVALID on initial load is the one genuinely process-fatal
            // error kind (§7); the process exits before this could be scraped.
            logging.record_fatal();
            error!(error = %e, "failed to load configuration");
            process::exit(1);
        }
    };

    let auth_creds: Option<Arc<(String, String)>> = match (&args.auth_user, &args.auth_password) {
        (Some(user), Some(pass)) => {
            info!("basic auth enabled for metrics/bridge surfaces");
            Some(Arc::new((user.clone(), pass.clone())))
        }
        (Some(_), None) | (None, Some(_)) => {
            error!("--auth-user and --auth-password must both be set");
            process::exit(1);
        }
        _ => None,
    };

    let shutdown = Arc::new(Notify::new());

    tokio::spawn(background::bridge_refresh_loop(state.clone()));
    tokio::spawn(mgmt::run(state.clone(), shutdown.clone()));

    let snapshot = state.snapshot.load();
    let host = snapshot.config.host.clone();
    let metrics_addr: SocketAddr = format!("{host}:{}", snapshot.config.metrics_port).parse().expect("invalid metrics listen address");
    let bridge_addr: SocketAddr = format!("{host}:{}", snapshot.config.bridge_port).parse().expect("invalid bridge listen address");
    let metrics_tls = snapshot.config.metrics_tls.clone().map(|t| tls::build_acceptor(&t).expect("invalid metrics TLS material"));
    let bridge_tls = snapshot.config.bridge_tls.clone().map(|t| tls::build_acceptor(&t).expect("invalid bridge TLS material"));
    drop(snapshot);

    let metrics_router = build_router(state.clone(), auth_creds.clone(), metrics_only_routes());
    let bridge_router = build_router(state.clone(), auth_creds.clone(), bridge_only_routes());

    let metrics_listener = tokio::net::TcpListener::bind(metrics_addr).await.expect("failed to bind metrics listener");
    let bridge_listener = tokio::net::TcpListener::bind(bridge_addr).await.expect("failed to bind bridge listener");

    info!(%metrics_addr, "metrics surface listening");
    info!(%bridge_addr, "bridge surface listening");

    let metrics_task = tokio::spawn(async move {
        let app = metrics_router.into_make_service_with_connect_info::<SocketAddr>();
        match metrics_tls {
            Some(acceptor) => {
                let listener = tls::TlsListener::new(metrics_listener, acceptor);
                axum::serve(listener, app).await
            }
            None => axum::serve(metrics_listener, app).await,
        }
    });

    let bridge_task = tokio::spawn(async move {
        let app = bridge_router.into_make_service_with_connect_info::<SocketAddr>();
        match bridge_tls {
            Some(acceptor) => {
                let listener = tls::TlsListener::new(bridge_listener, acceptor);
                axum::serve(listener, app).await
            }
            None => axum::serve(bridge_listener, app).await,
        }
    });

    tokio::select! {
        _ = shutdown.notified() => {
            info!("shutdown requested over the management surface");
        }
        result = metrics_task => {
            match result {
                Ok(Err(e)) => error!(error = %e, "metrics surface exited"),
                Err(e) => error!(error = %e, "metrics surface task panicked"),
                Ok(Ok(())) => {}
            }
        }
        result = bridge_task => {
            match result {
                Ok(Err(e)) => error!(error = %e, "bridge surface exited"),
                Err(e) => error!(error = %e, "bridge surface task panicked"),
                Ok(Ok(())) => {}
            }
        }
    }
}

fn metrics_only_routes() -> Router<Arc<AppState>> {
    Router::new().route("/", get(handlers::metrics)).route("/metrics", get(handlers::metrics))
}

fn bridge_only_routes() -> Router<Arc<AppState>> {
    Router::new().route("/metrics/bridge", get(handlers::bridge_text)).route("/metrics/bridge.json", get(handlers::bridge_json))
}

/// Wires a route table with the shared state and the common middleware
/// stack. `AccessLogLayer` goes on last (outermost) so it wraps the auth
/// layer and can read the `AuthUser` extension it inserts — axum layers:
/// the last `.layer()` call is outermost, and a request flows outside-in.
fn build_router(state: Arc<AppState>, auth_creds: Option<Arc<(String, String)>>, routes: Router<Arc<AppState>>) -> Router {
    let mut app = routes.with_state(state);

    if let Some(creds) = auth_creds {
        app = app.layer(axum::middleware::from_fn_with_state(creds, basic_auth_middleware));
    }

    app.layer(AccessLogLayer).layer(CorsLayer::permissive())
}
