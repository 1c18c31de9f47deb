//! Shared utilities for integration tests.

use std::net::SocketAddr;
use std::path::Path;

use lemon::config::AppConfig;
use lemon::{Application, HttpServer, Route, Shutdown};
use tokio::net::TcpListener;

/// A server running on an ephemeral local port.
pub struct TestServer {
    pub addr: SocketAddr,
    pub shutdown: Shutdown,
}

impl TestServer {
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.shutdown.trigger();
    }
}

/// Start serving `app`. The listener is bound before this returns.
pub async fn spawn_app(app: Application) -> TestServer {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let shutdown = Shutdown::new();
    let server_shutdown = shutdown.subscribe();

    tokio::spawn(async move {
        let _ = HttpServer::new(app).run(listener, server_shutdown).await;
    });

    TestServer { addr, shutdown }
}

/// Build an application rooted at `work_dir` and start it.
pub async fn spawn_routes(routes: Vec<Route>, config: AppConfig, work_dir: &Path) -> TestServer {
    let app = Application::with_work_dir(routes, config, work_dir).unwrap();
    spawn_app(app).await
}

/// Client that keeps cookies and does not follow redirects.
pub fn client() -> reqwest::Client {
    reqwest::Client::builder()
        .no_proxy()
        .cookie_store(true)
        .redirect(reqwest::redirect::Policy::none())
        .build()
        .unwrap()
}

/// Production settings: no debug pages.
#[allow(dead_code)]
pub fn production() -> AppConfig {
    AppConfig {
        debug: false,
        ..AppConfig::default()
    }
}
