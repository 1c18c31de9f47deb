//! Application: routes, settings and shared collaborators.
//!
//! # Responsibilities
//! - Apply settings and register the initial routes on the catch-all host
//! - Register static file routes when no static root is configured
//! - Own the template store and the router
//! - Resolve named routes back to URLs
//!
//! # Design Decisions
//! - Registration takes `&mut self`; serving shares `Arc<Application>`,
//!   so the table cannot change while requests are in flight
//! - Configuration errors are returned at build time, never at request time

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde_json::{json, Map, Value};

use crate::config::{validate_config, AppConfig, ConfigError};
use crate::handler::{Params, StaticFileHandler};
use crate::routing::{add_route, Route, RouteError, Router};
use crate::templates::{TemplateRenderer, TemplateStore};

/// Host pattern the initial routes are registered under.
pub const CATCH_ALL_HOST: &str = ".*$";

/// Signing key used when `cookie_secret` is empty.
const FALLBACK_COOKIE_SECRET: &str = "lemon cookie secret";

const STATIC_ROUTES: [&str; 3] = [r"/static/(.*)", r"/(favicon\.ico)", r"/(robots\.txt)"];

/// A configured web application.
pub struct Application {
    config: AppConfig,
    router: Router,
    template_store: Option<TemplateStore>,
    renderer: Option<Arc<dyn TemplateRenderer>>,
    work_dir: PathBuf,
    static_root: PathBuf,
}

impl std::fmt::Debug for Application {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Application")
            .field("config", &self.config)
            .field("router", &self.router)
            .field("template_store", &self.template_store)
            .field("work_dir", &self.work_dir)
            .field("static_root", &self.static_root)
            .finish()
    }
}

impl Application {
    /// Build an application serving `routes` on every host.
    pub fn new(routes: Vec<Route>, config: AppConfig) -> Result<Self, ConfigError> {
        let work_dir = std::env::current_dir()?;
        Self::with_work_dir(routes, config, work_dir)
    }

    /// Build from a flat settings table; unknown keys are kept in `extra`.
    pub fn with_settings(routes: Vec<Route>, settings: Map<String, Value>) -> Result<Self, ConfigError> {
        Self::new(routes, AppConfig::from_settings(settings)?)
    }

    /// Build with an explicit working directory for default paths.
    pub fn with_work_dir(
        mut routes: Vec<Route>,
        config: AppConfig,
        work_dir: impl Into<PathBuf>,
    ) -> Result<Self, ConfigError> {
        validate_config(&config).map_err(ConfigError::Validation)?;
        let work_dir = work_dir.into();

        let static_root = match &config.static_path {
            Some(path) => path.clone(),
            None => {
                let root = work_dir.join("static");
                let mut params = Params::new();
                params.insert("path".to_string(), json!(root.to_string_lossy()));
                for pattern in STATIC_ROUTES {
                    routes.push(add_route::<StaticFileHandler>(pattern, params.clone(), None)?);
                }
                root
            }
        };

        let template_store = if config.custom_templates {
            None
        } else {
            Some(TemplateStore::new(
                config.template_dir(&work_dir),
                &config.left_braces,
                &config.right_braces,
            )?)
        };

        if config.cookie_secret.is_empty() {
            tracing::warn!("cookie_secret is not set; signed cookies use a built-in key");
        }

        let mut router = Router::new(config.default_host.clone());
        router.add_handlers(CATCH_ALL_HOST, routes)?;

        tracing::info!(
            debug = config.debug,
            xsrf_cookies = config.xsrf_cookies,
            gzip = config.gzip,
            static_root = %static_root.display(),
            "application configured"
        );

        Ok(Self {
            config,
            router,
            template_store,
            renderer: None,
            work_dir,
            static_root,
        })
    }

    /// Append routes for a host pattern.
    ///
    /// Entries registered after a catch-all are placed before it.
    pub fn add_handlers(&mut self, host_pattern: &str, routes: Vec<Route>) -> Result<(), RouteError> {
        self.router.add_handlers(host_pattern, routes)
    }

    /// Replace the template collaborator.
    pub fn set_template_renderer(&mut self, renderer: Arc<dyn TemplateRenderer>) {
        self.renderer = Some(renderer);
    }

    /// Register a value or function visible to every template.
    ///
    /// Has no effect when `custom_templates` is set, as there is no
    /// built-in store then.
    pub fn add_template_global(&mut self, name: &str, value: minijinja::Value) {
        match self.template_store.as_mut() {
            Some(store) => store.add_global(name.to_string(), value),
            None => tracing::warn!(name, "no template store; global not registered"),
        }
    }

    /// URL path for the route named `name`.
    pub fn reverse_url(&self, name: &str, args: &[&str]) -> Result<String, RouteError> {
        self.router.reverse_url(name, args)
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn router(&self) -> &Router {
        &self.router
    }

    /// The renderer handlers use: a replacement set through
    /// [`set_template_renderer`](Self::set_template_renderer), else the
    /// built-in store.
    pub fn templates(&self) -> Option<&dyn TemplateRenderer> {
        match &self.renderer {
            Some(renderer) => Some(renderer.as_ref()),
            None => self
                .template_store
                .as_ref()
                .map(|store| store as &dyn TemplateRenderer),
        }
    }

    /// Key for signed cookies.
    pub fn cookie_secret(&self) -> &str {
        if self.config.cookie_secret.is_empty() {
            FALLBACK_COOKIE_SECRET
        } else {
            &self.config.cookie_secret
        }
    }

    /// Settings not recognised by the framework.
    pub fn extra(&self) -> &Map<String, Value> {
        &self.config.extra
    }

    pub fn work_dir(&self) -> &Path {
        &self.work_dir
    }

    pub fn static_root(&self) -> &Path {
        &self.static_root
    }
}
