use async_trait::async_trait;

use crate::error::StoreError;
use crate::events::OrderEvent;
use crate::types::Trade;

/// Sink for outbound order events. Confirmed settlements arrive here as
/// `OrderEvent::OrderFilled`.
///
/// Events are keyed by order id. An id may be reused once its order has
/// closed, so `get_events` returns every lifecycle under that id in arrival
/// order; each lifecycle starts with an `OrderAccepted`.
#[async_trait]
pub trait EventStore: Send + Sync {
    async fn save_events(&self, events: Vec<OrderEvent>) -> Result<(), StoreError>;
    async fn get_events(&self, order_id: &str) -> Result<Vec<OrderEvent>, StoreError>;
    async fn get_all_events(&self) -> Result<Vec<OrderEvent>, StoreError>;

    async fn get_trades(&self) -> Result<Vec<Trade>, StoreError> {
        Ok(self
            .get_all_events()
            .await?
            .iter()
            .filter_map(|e| e.trade().cloned())
            .collect())
    }
}

pub struct InMemoryEventStore {
    events: dashmap::DashMap<String, Vec<OrderEvent>>,
}

impl InMemoryEventStore {
    pub fn new() -> Self {
        Self {
            events: dashmap::DashMap::new(),
        }
    }
}

impl Default for InMemoryEventStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EventStore for InMemoryEventStore {
    async fn save_events(&self, events: Vec<OrderEvent>) -> Result<(), StoreError> {
        for event in events {
            self.events
                .entry(event.order_id().to_string())
                .or_default()
                .push(event);
        }
        Ok(())
    }

    async fn get_events(&self, order_id: &str) -> Result<Vec<OrderEvent>, StoreError> {
        Ok(self
            .events
            .get(order_id)
            .map(|events| events.clone())
            .unwrap_or_default())
    }

    async fn get_all_events(&self) -> Result<Vec<OrderEvent>, StoreError> {
        Ok(self
            .events
            .iter()
            .flat_map(|entry| entry.value().clone())
            .collect())
    }
}
