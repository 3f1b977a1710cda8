use crate::ledger::{AvailabilityLedger, Repair};
use anyhow::Result;
use std::time::Duration;
use tokio::time;
use tracing::{error, info, warn};

/// Periodically recomputes every car's availability from its active leases.
pub struct Reconciler {
    ledger: AvailabilityLedger,
    every: Duration,
}

impl Reconciler {
    pub fn new(ledger: AvailabilityLedger, every: Duration) -> Self {
        Self { ledger, every }
    }

    pub async fn run(&self) {
        let mut interval = time::interval(self.every);
        // The first tick fires immediately; skip it so start-up is not a full sweep.
        interval.tick().await;

        loop {
            interval.tick().await;

            if let Err(e) = self.sweep().await {
                error!("Availability reconciliation failed: {}", e);
            }
        }
    }

    pub async fn sweep(&self) -> Result<Vec<Repair>> {
        let repairs = self.ledger.reconcile_all().await?;
        if repairs.is_empty() {
            info!("Availability reconciliation found no drift");
        }
        for repair in &repairs {
            warn!(
                "Car {} availability repaired: {} -> {}",
                repair.car_id, repair.was_available, repair.available
            );
        }
        Ok(repairs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::InMemoryStore;
    use crate::store::RecordStore;
    use bigdecimal::BigDecimal;
    use shared::{CarCategory, FuelType, NewCar, Transmission};
    use std::sync::Arc;

    #[tokio::test]
    async fn sweep_repairs_drifted_cars() {
        let store = Arc::new(InMemoryStore::new());
        let car = store
            .create_car(NewCar {
                make: "Isuzu".to_string(),
                model: "D-Max".to_string(),
                year: 2020,
                category: CarCategory::Truck,
                transmission: Transmission::Manual,
                fuel_type: FuelType::Diesel,
                seats: 5,
                doors: 4,
                daily_rate: BigDecimal::from(7000),
                monthly_rate: BigDecimal::from(150000),
                location: None,
                mileage: None,
                license_plate: None,
                description: None,
            })
            .await
            .unwrap();
        store.force_availability(car.id, false).await;

        let reconciler = Reconciler::new(
            AvailabilityLedger::new(store.clone()),
            Duration::from_secs(300),
        );
        let repairs = reconciler.sweep().await.unwrap();

        assert_eq!(repairs.len(), 1);
        assert_eq!(repairs[0].car_id, car.id);
        assert!(reconciler.sweep().await.unwrap().is_empty());
    }
}
