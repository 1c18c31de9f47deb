//! lemon demo server.
//!
//! Serves a small application showing routing, reverse URLs, form handling
//! with XSRF protection and static files.
//!
//! ```text
//! lemon --config lemon.toml --bind 127.0.0.1:8000 --log-level debug
//! ```

use std::path::PathBuf;

use axum::http::Method;
use clap::Parser;
use serde_json::json;

use lemon::config::{load_config, AppConfig};
use lemon::lifecycle::{signals, Shutdown};
use lemon::observability::logging::init_logging;
use lemon::routing::RouteError;
use lemon::{
    add_route, Application, HandlerContext, HandlerResult, HttpServer, Params, PathArgs,
    RequestHandler, Route,
};

#[derive(Parser, Debug)]
#[command(name = "lemon", version, about = "Run the lemon demo application")]
struct Cli {
    /// Path to a TOML configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override the listener bind address.
    #[arg(short, long)]
    bind: Option<String>,

    /// Override the log level (trace, debug, info, warn, error).
    #[arg(long)]
    log_level: Option<String>,
}

#[derive(Default)]
struct HomeHandler;

impl RequestHandler for HomeHandler {
    fn get(&mut self, ctx: &mut HandlerContext, _args: &PathArgs) -> HandlerResult {
        let user_url = ctx.reverse_url("user", &["42"])?;
        let echo_url = ctx.reverse_url("echo", &[])?;
        ctx.write_str(&format!(
            "<h1>Hello from lemon</h1>\
             <p><a href=\"{user_url}\">a user</a> | <a href=\"{echo_url}\">echo form</a></p>"
        ));
        Ok(())
    }
}

#[derive(Default)]
struct UserHandler;

impl RequestHandler for UserHandler {
    fn path_args(&self, _method: &Method) -> Option<usize> {
        Some(1)
    }

    fn get(&mut self, ctx: &mut HandlerContext, args: &PathArgs) -> HandlerResult {
        let [id] = args.exactly::<1>()?;
        let url = ctx.reverse_url("user", &[id])?;
        ctx.write_json(&json!({ "id": id, "url": url }))
    }
}

#[derive(Default)]
struct EchoHandler;

impl RequestHandler for EchoHandler {
    fn get(&mut self, ctx: &mut HandlerContext, _args: &PathArgs) -> HandlerResult {
        let form = ctx.xsrf_form_html();
        ctx.write_str(&format!(
            "<form method=\"post\">{form}<input name=\"message\"><button>Send</button></form>"
        ));
        Ok(())
    }

    fn post(&mut self, ctx: &mut HandlerContext, _args: &PathArgs) -> HandlerResult {
        let message = ctx.get_argument("message", "");
        ctx.set_header("content-type", "text/plain; charset=UTF-8");
        ctx.write_str(&message);
        Ok(())
    }
}

fn demo_routes() -> Result<Vec<Route>, RouteError> {
    Ok(vec![
        add_route::<HomeHandler>("/", Params::new(), Some("home"))?,
        add_route::<UserHandler>("/user/([0-9]+)", Params::new(), Some("user"))?,
        add_route::<EchoHandler>("/echo", Params::new(), Some("echo"))?,
    ])
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => load_config(path)?,
        None => AppConfig::default(),
    };
    if let Some(bind) = cli.bind {
        config.listener.bind_address = bind;
    }
    if let Some(level) = cli.log_level {
        config.log_level = level;
    }

    init_logging(&config.log_level);
    tracing::info!("lemon v{} starting", env!("CARGO_PKG_VERSION"));

    let available = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1);
    let workers = config.worker_threads(available);
    tracing::info!(
        bind_address = %config.listener.bind_address,
        workers,
        tls = config.tls_enabled(),
        "Configuration loaded"
    );

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(workers)
        .enable_all()
        .build()?;
    runtime.block_on(serve(config))
}

async fn serve(config: AppConfig) -> Result<(), Box<dyn std::error::Error>> {
    let app = Application::new(demo_routes()?, config)?;

    let shutdown = Shutdown::new();
    signals::spawn_signal_listener(&shutdown);

    HttpServer::new(app).start(shutdown.subscribe()).await?;

    tracing::info!("Shutdown complete");
    Ok(())
}
