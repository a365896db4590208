//! Infrastructure wiring: store, payment gateways, event bus, orchestrator.

use std::sync::Arc;

use anyhow::Context;
use serde_json::Value as JsonValue;
use tracing::{info, warn};

use storefront_events::{EventBus, EventEnvelope, InMemoryEventBus};
use storefront_infra::services::{SharedStore, WebhookSecrets};
use storefront_infra::{AppConfig, InMemoryCommerceStore, Orchestrator, PostgresCommerceStore};
use storefront_payments::GatewayRegistry;

type Bus = InMemoryEventBus<EventEnvelope<JsonValue>>;

/// Everything handlers need, shared behind an `Arc`.
#[derive(Clone)]
pub struct AppServices {
    pub commerce: Orchestrator,
}

impl AppServices {
    /// Wire the orchestrator over `store` and start logging its events.
    pub fn new(
        store: SharedStore,
        gateways: GatewayRegistry,
        secrets: WebhookSecrets,
        cart_ttl: chrono::Duration,
    ) -> Self {
        let bus: Arc<Bus> = Arc::new(InMemoryEventBus::new());
        spawn_event_logger(&bus);

        let commerce = Orchestrator::new(store, gateways, bus, cart_ttl).with_webhook_secrets(secrets);
        Self { commerce }
    }
}

/// Postgres when `DATABASE_URL` is set, otherwise an empty in-memory store.
pub async fn build_services(config: &AppConfig) -> anyhow::Result<AppServices> {
    let store: SharedStore = match &config.database_url {
        Some(url) => {
            let store = PostgresCommerceStore::connect(url)
                .await
                .context("failed to connect to DATABASE_URL")?;
            store.migrate().await.context("failed to apply schema")?;
            info!("using postgres store");
            Arc::new(store)
        }
        None => {
            warn!("DATABASE_URL not set; using in-memory store (data is lost on restart)");
            Arc::new(InMemoryCommerceStore::new())
        }
    };

    let gateways = config.gateways().context("failed to configure payment gateways")?;
    Ok(AppServices::new(store, gateways, config.webhook_secrets(), config.cart_ttl))
}

/// Background subscriber: bus -> structured log lines.
fn spawn_event_logger(bus: &Arc<Bus>) {
    let sub = bus.subscribe();
    tokio::task::spawn_blocking(move || {
        while let Ok(envelope) = sub.recv() {
            info!(
                event_type = envelope.event_type(),
                aggregate_id = %envelope.aggregate_id(),
                sequence = envelope.sequence_number(),
                "domain event"
            );
        }
    });
}
