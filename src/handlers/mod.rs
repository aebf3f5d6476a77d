mod chat;
mod health;
mod metrics;

pub use chat::{apply_cors, chat_handler, method_not_allowed, preflight_handler, FALLBACK_REPLY};
pub use health::health_handler;
pub use metrics::metrics_handler;
