mod base;
mod bus;

pub use base::{EventEmitter, EventKind, ExecutionEvent};
pub use bus::EventBus;
