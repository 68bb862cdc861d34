//! Application state.

use std::sync::Arc;

use credit_ledger_core::{DiscountPolicy, RuleTablePolicy};
use credit_ledger_store::Store;

use crate::config::ServiceConfig;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    /// The storage backend.
    pub store: Arc<dyn Store>,

    /// Service configuration.
    pub config: ServiceConfig,

    /// Discount rules applied at order finalization.
    pub discounts: Arc<dyn DiscountPolicy>,
}

impl AppState {
    /// Create application state with the default discount rules.
    #[must_use]
    pub fn new(store: Arc<dyn Store>, config: ServiceConfig) -> Self {
        Self::with_discounts(store, config, Arc::new(RuleTablePolicy::default()))
    }

    /// Create application state with a custom discount policy.
    #[must_use]
    pub fn with_discounts(
        store: Arc<dyn Store>,
        config: ServiceConfig,
        discounts: Arc<dyn DiscountPolicy>,
    ) -> Self {
        Self {
            store,
            config,
            discounts,
        }
    }
}
