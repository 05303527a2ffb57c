use std::fmt;
use std::sync::Arc;

use crate::auth::TokenKeys;
use crate::payments::PaymentGateway;
use crate::store::DocumentStore;

/// Shared per-request state. The store is constructed once in `main` and closed there.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn DocumentStore>,
    pub tokens: Arc<TokenKeys>,
    pub payments: Option<Arc<dyn PaymentGateway>>,
}

impl fmt::Debug for AppState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AppState")
            .field("store", &self.store.backend_tag())
            .field("tokens", &self.tokens)
            .field("payments", &self.payments.is_some())
            .finish()
    }
}
