//! Publishes committed domain events to NATS.

use tracing::{debug, info, warn};

use crate::domain::events::DomainEvent;

const SUBJECT_PREFIX: &str = "storefront";

#[derive(Clone, Default)]
pub struct EventBus { nats: Option<async_nats::Client> }

impl EventBus {
    /// Events are only logged.
    pub fn disabled() -> Self { Self::default() }

    /// Falls back to a disabled bus when the server cannot be reached.
    pub async fn connect(url: Option<&str>) -> Self {
        let Some(url) = url else { return Self::disabled() };
        match async_nats::connect(url).await {
            Ok(client) => { info!(url, "connected to NATS"); Self { nats: Some(client) } }
            Err(e) => { warn!(url, error = %e, "NATS unavailable, events will only be logged"); Self::disabled() }
        }
    }

    pub fn is_enabled(&self) -> bool { self.nats.is_some() }

    /// Never fails: the state change behind the events is already committed.
    pub async fn publish(&self, events: Vec<DomainEvent>) {
        for event in events {
            let subject = format!("{}.{}", SUBJECT_PREFIX, event.kind());
            let Some(client) = &self.nats else {
                debug!(%subject, ?event, "domain event");
                continue;
            };
            let payload = match serde_json::to_vec(&event) {
                Ok(p) => p,
                Err(e) => { warn!(%subject, error = %e, "could not serialize event"); continue; }
            };
            if let Err(e) = client.publish(subject.clone(), payload.into()).await {
                warn!(%subject, error = %e, "failed to publish event");
            }
        }
    }
}
