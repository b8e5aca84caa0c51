//! Service assembly and HTTP routing.
//!
//! [`Saga::assemble`] wires the store, ledger, breakers and event sinks into
//! the intake service, orchestrator and recovery scanner. `main` and the
//! integration tests build the service the same way, differing only in the
//! store and ledger they pass in.

use std::sync::Arc;
use std::time::Duration;

use axum::{
    Router,
    routing::{get, post},
};
use tower_http::trace::TraceLayer;

use crate::handlers;
use crate::ledger::{LedgerApi, LedgerClient, LedgerClientPolicy};
use crate::resilience::CircuitBreakerRegistry;
use crate::services::compensation::{CompensationCoordinator, CompensationPolicy};
use crate::services::event_publisher::EventPublisher;
use crate::services::orchestrator::SagaOrchestrator;
use crate::services::recovery::{RecoveryConfig, RecoveryScanner};
use crate::services::transfer_service::TransferService;
use crate::store::TransferStore;

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub transfers: Arc<TransferService>,
    pub store: Arc<dyn TransferStore>,
    pub breakers: Arc<CircuitBreakerRegistry>,
}

/// Tunables for the saga drivers.
#[derive(Debug, Clone, Default)]
pub struct SagaSettings {
    pub ledger: LedgerClientPolicy,
    pub compensation: CompensationPolicy,
    pub recovery: RecoveryConfig,
    pub deadline: Option<Duration>,
}

/// The assembled service.
pub struct Saga {
    pub orchestrator: Arc<SagaOrchestrator>,
    pub transfers: Arc<TransferService>,
    pub scanner: Arc<RecoveryScanner>,
    pub state: AppState,
}

impl Saga {
    pub fn assemble(
        store: Arc<dyn TransferStore>,
        ledger: Arc<dyn LedgerApi>,
        breakers: Arc<CircuitBreakerRegistry>,
        publisher: EventPublisher,
        settings: SagaSettings,
    ) -> Self {
        let client = Arc::new(LedgerClient::new(ledger, &breakers, settings.ledger));

        let compensation = CompensationCoordinator::new(
            store.clone(),
            client.clone(),
            publisher.clone(),
            settings.compensation,
        );
        let orchestrator = Arc::new(
            SagaOrchestrator::new(store.clone(), client, compensation, publisher.clone())
                .with_deadline(settings.deadline),
        );
        let transfers = Arc::new(TransferService::new(
            store.clone(),
            orchestrator.clone(),
            publisher,
        ));
        let scanner = Arc::new(RecoveryScanner::new(
            store.clone(),
            orchestrator.clone(),
            settings.recovery,
        ));

        let state = AppState {
            transfers: transfers.clone(),
            store,
            breakers,
        };

        Self {
            orchestrator,
            transfers,
            scanner,
            state,
        }
    }

    pub fn router(&self) -> Router {
        router(self.state.clone())
    }
}

/// Build the HTTP router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health::health_check))
        .route(
            "/api/v1/transfers",
            post(handlers::transfers::submit_transfer),
        )
        .route(
            "/api/v1/transfers/{reference}",
            get(handlers::transfers::get_transfer),
        )
        .route(
            "/api/v1/accounts/{account_number}/transfers",
            get(handlers::transfers::list_account_transfers),
        )
        // Add distributed tracing middleware for observability
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
