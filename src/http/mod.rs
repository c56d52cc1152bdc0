//! HTTP layer - request validation, staging and response shaping

pub mod models;
pub mod routes;
pub mod validation;

use std::sync::Arc;

use crate::compiler::DocumentCompiler;
use crate::config::Config;

pub use routes::create_router;

/// State shared by every request
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub compiler: Arc<dyn DocumentCompiler>,
}

impl AppState {
    pub fn new(config: Config, compiler: impl DocumentCompiler + 'static) -> Self {
        Self {
            config: Arc::new(config),
            compiler: Arc::new(compiler),
        }
    }
}
