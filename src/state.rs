use std::sync::Arc;

use crate::clock::Clock;
use crate::config::GenerationParams;
use crate::dispatcher::Dispatcher;
use crate::persistence::ConversationStore;
use crate::rate_limit::RateLimiter;
// app's shared state

pub struct AppState {
    pub dispatcher: Dispatcher,
    pub store: ConversationStore,
    pub rate_limiter: Arc<RateLimiter>,
    pub generation: GenerationParams, // max_tokens + temperature for every turn
    pub clock: Arc<dyn Clock>,
}
