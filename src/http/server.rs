//! HTTP server setup and configuration.
//!
//! # Responsibilities
//! - Create the Axum Router whose fallback feeds every request to the
//!   dispatcher
//! - Wire up middleware (tracing, body limit, read and write timeouts)
//! - Bind plain or TLS listeners
//! - Stop gracefully on the shutdown signal
//!
//! # Design Decisions
//! - Handler code is synchronous; each request runs on the blocking pool
//! - The request body is buffered before dispatch (bounded by `max_memory`)

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Body,
    extract::{ConnectInfo, DefaultBodyLimit, State},
    http::{Request, StatusCode},
    response::{IntoResponse, Response},
    Router,
};
use axum_server::tls_rustls::RustlsConfig;
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tower_http::{
    timeout::{RequestBodyTimeoutLayer, TimeoutLayer},
    trace::TraceLayer,
};

use crate::application::Application;
use crate::config::ConfigError;
use crate::handler::Dispatcher;
use crate::http::request::{RequestContext, RequestOptions};
use crate::net::tls;

/// Time allowed for in-flight TLS requests after shutdown is requested.
const TLS_DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TLS setup failed: {0}")]
    Tls(#[source] ConfigError),
}

/// State injected into the fallback handler.
#[derive(Clone)]
struct ServerState {
    dispatcher: Dispatcher,
    tls: bool,
}

/// HTTP server for an [`Application`].
pub struct HttpServer {
    dispatcher: Dispatcher,
}

impl HttpServer {
    pub fn new(app: Application) -> Self {
        Self::from_shared(Arc::new(app))
    }

    pub fn from_shared(app: Arc<Application>) -> Self {
        Self {
            dispatcher: Dispatcher::new(app),
        }
    }

    pub fn app(&self) -> &Arc<Application> {
        self.dispatcher.app()
    }

    /// Build the Axum router with all middleware layers.
    #[allow(deprecated)]
    fn build_router(&self, tls: bool) -> Router {
        let config = self.app().config();
        let state = ServerState {
            dispatcher: self.dispatcher.clone(),
            tls,
        };

        let mut router = Router::new()
            .fallback(dispatch_request)
            .with_state(state)
            .layer(DefaultBodyLimit::max(config.max_memory));
        if let Some(read_timeout) = config.read_timeout() {
            router = router.layer(RequestBodyTimeoutLayer::new(read_timeout));
        }
        if let Some(write_timeout) = config.write_timeout() {
            router = router.layer(TimeoutLayer::new(write_timeout));
        }
        router.layer(TraceLayer::new_for_http())
    }

    /// Bind the configured address and serve until shutdown.
    ///
    /// TLS is used when both `cert_file` and `key_file` are set.
    pub async fn start(self, shutdown: broadcast::Receiver<()>) -> Result<(), ServerError> {
        let config = self.app().config().clone();
        let address = config.listener.bind_address.clone();

        match (&config.cert_file, &config.key_file) {
            (Some(cert), Some(key)) => {
                let tls_config = tls::load_tls_config(cert, key)
                    .await
                    .map_err(ServerError::Tls)?;
                let addr: SocketAddr = address.parse().map_err(|_| {
                    ServerError::Tls(ConfigError::InvalidSetting(format!(
                        "invalid bind address '{address}'"
                    )))
                })?;
                self.run_tls(addr, tls_config, shutdown).await
            }
            _ => {
                let listener = TcpListener::bind(&address).await?;
                self.run(listener, shutdown).await
            }
        }
    }

    /// Run the server, accepting connections on the given listener.
    pub async fn run(
        self,
        listener: TcpListener,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<(), ServerError> {
        let addr = listener.local_addr()?;
        tracing::info!(address = %addr, "HTTP server starting");

        let app = self
            .build_router(false)
            .into_make_service_with_connect_info::<SocketAddr>();

        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown.recv().await;
            })
            .await?;

        tracing::info!("HTTP server stopped");
        Ok(())
    }

    /// Run the server over TLS.
    pub async fn run_tls(
        self,
        addr: SocketAddr,
        tls_config: RustlsConfig,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<(), ServerError> {
        tracing::info!(address = %addr, "HTTPS server starting");

        let handle = axum_server::Handle::new();
        let shutdown_handle = handle.clone();
        tokio::spawn(async move {
            let _ = shutdown.recv().await;
            shutdown_handle.graceful_shutdown(Some(TLS_DRAIN_TIMEOUT));
        });

        let app = self
            .build_router(true)
            .into_make_service_with_connect_info::<SocketAddr>();
        axum_server::bind_rustls(addr, tls_config)
            .handle(handle)
            .serve(app)
            .await?;

        tracing::info!("HTTPS server stopped");
        Ok(())
    }
}

/// Every request lands here; routing is done by the dispatcher.
async fn dispatch_request(State(state): State<ServerState>, request: Request<Body>) -> Response {
    let config = state.dispatcher.app().config();
    let options = RequestOptions {
        remote_addr: request
            .extensions()
            .get::<ConnectInfo<SocketAddr>>()
            .map(|info| info.0),
        xheaders: config.xheaders,
        tls: state.tls,
        max_memory: config.max_memory,
    };

    let ctx = match RequestContext::from_request(request, options).await {
        Ok(ctx) => ctx,
        Err(e) => {
            tracing::warn!(status = %e.status, error = %e.message, "failed to read request");
            return (e.status, e.message).into_response();
        }
    };

    let dispatcher = state.dispatcher.clone();
    match tokio::task::spawn_blocking(move || dispatcher.dispatch(ctx)).await {
        Ok(response) => response.into_response(),
        Err(e) => {
            tracing::error!(error = %e, "dispatch task failed");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}
