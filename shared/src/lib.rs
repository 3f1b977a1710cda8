mod pricing;
mod records;

pub use pricing::*;
pub use records::*;

use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LeaseEventType {
    LeaseCreated,
    LeasePaid,
    LeaseCancelled,
    LeaseRefunded,
}

impl LeaseEventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            LeaseEventType::LeaseCreated => "LeaseCreated",
            LeaseEventType::LeasePaid => "LeasePaid",
            LeaseEventType::LeaseCancelled => "LeaseCancelled",
            LeaseEventType::LeaseRefunded => "LeaseRefunded",
        }
    }
}

/// Payload of a lifecycle change, written to the outbox in the same unit as the change itself.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LeaseEvent {
    pub event_type: LeaseEventType,
    pub lease_id: Uuid,
    pub car_id: Uuid,
    pub customer_id: Uuid,
    pub payment_status: PaymentStatus,
    pub total_amount: BigDecimal,
    pub car_available: Option<bool>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboxEvent {
    pub id: Uuid,
    pub aggregate_id: Uuid,
    pub event_type: String,
    pub event_data: serde_json::Value,
    pub processed: bool,
    pub created_at: DateTime<Utc>,
}

impl LeaseEvent {
    pub fn new(event_type: LeaseEventType, lease: &Lease, car_available: Option<bool>) -> Self {
        Self {
            event_type,
            lease_id: lease.id,
            car_id: lease.car_id(),
            customer_id: lease.customer_id(),
            payment_status: lease.payment_status,
            total_amount: lease.total_amount.clone(),
            car_available,
            occurred_at: Utc::now(),
        }
    }
}

impl OutboxEvent {
    pub fn from_lease_event(event: &LeaseEvent) -> serde_json::Result<Self> {
        Ok(Self {
            id: Uuid::new_v4(),
            aggregate_id: event.lease_id,
            event_type: event.event_type.as_str().to_string(),
            event_data: serde_json::to_value(event)?,
            processed: false,
            created_at: event.occurred_at,
        })
    }
}
