//! Standard node library
//!
//! One handler per node kind, plus the concrete collaborators they talk to.

mod code;
mod condition;
pub mod expression;
mod http;
mod model_call;
mod output;
mod resolve;
pub mod services;
mod start;
mod template_transform;
mod variable_set;

pub use code::CodeHandler;
pub use condition::ConditionHandler;
pub use http::HttpRequestHandler;
pub use model_call::ModelCallHandler;
pub use output::OutputHandler;
pub use start::StartHandler;
pub use template_transform::TemplateTransformHandler;
pub use variable_set::VariableSetHandler;

use pilotcore::services::{CodeEvaluator, CompletionService, HttpClient};
use pilotruntime::HandlerRegistry;
use std::sync::Arc;

/// Collaborators shared by every run
#[derive(Clone)]
pub struct Services {
    pub completion: Arc<dyn CompletionService>,
    pub http: Arc<dyn HttpClient>,
    pub code: Arc<dyn CodeEvaluator>,
}

/// Register all standard handlers with a registry
pub fn register_all(registry: &mut HandlerRegistry, services: &Services) {
    registry.register(Arc::new(StartHandler));
    registry.register(Arc::new(ModelCallHandler::new(Arc::clone(&services.completion))));
    registry.register(Arc::new(ConditionHandler));
    registry.register(Arc::new(CodeHandler::new(Arc::clone(&services.code))));
    registry.register(Arc::new(HttpRequestHandler::new(Arc::clone(&services.http))));
    registry.register(Arc::new(VariableSetHandler));
    registry.register(Arc::new(TemplateTransformHandler));
    registry.register(Arc::new(OutputHandler));
}

/// A registry with every standard handler
pub fn standard_registry(services: &Services) -> HandlerRegistry {
    let mut registry = HandlerRegistry::new();
    register_all(&mut registry, services);
    registry
}
