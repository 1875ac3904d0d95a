//! Concrete collaborators behind the `pilotcore::services` traits

mod code;
mod completion;
mod http;

pub use code::{Interpreter, ProcessCodeEvaluator};
pub use completion::{EchoCompletionService, ModelPrice, OpenAiCompletionService, PricingTable};
pub use http::{ReqwestHttpClient, RetryPolicy};
