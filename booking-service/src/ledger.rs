use crate::error::BookingError;
use crate::lease_machine::AvailabilityEffect;
use crate::store::{AvailabilityChange, Filter, LeaseField, RecordStore};
use serde::Serialize;
use shared::{Car, PaymentStatus};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

/// A car whose stored flag disagreed with its active leases and was rewritten.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Repair {
    pub car_id: Uuid,
    pub was_available: bool,
    pub available: bool,
}

fn holding_leases() -> Filter<LeaseField> {
    Filter::Or(
        PaymentStatus::HOLDING
            .iter()
            .map(|status| Filter::equals(LeaseField::PaymentStatus, *status))
            .collect(),
    )
}

/// Owns every write to a car's `available` flag.
#[derive(Clone)]
pub struct AvailabilityLedger {
    store: Arc<dyn RecordStore>,
}

impl AvailabilityLedger {
    pub fn new(store: Arc<dyn RecordStore>) -> Self {
        Self { store }
    }

    /// Direct claim of a car outside any lease commit. Every standalone availability
    /// write goes through this or [`Self::mark_available`].
    pub async fn mark_unavailable(&self, car_id: Uuid) -> Result<(), BookingError> {
        if !self
            .store
            .set_car_availability(car_id, false, Some(true))
            .await?
        {
            return Err(BookingError::CarUnavailable(car_id));
        }
        info!("Car {} marked unavailable", car_id);
        Ok(())
    }

    /// Direct release of a car outside any lease commit.
    pub async fn mark_available(&self, car_id: Uuid) -> Result<(), BookingError> {
        self.store.set_car_availability(car_id, true, None).await?;
        info!("Car {} marked available", car_id);
        Ok(())
    }

    /// The store-level write a lease commit carries for `effect`.
    pub fn change_for(&self, car_id: Uuid, effect: AvailabilityEffect) -> Option<AvailabilityChange> {
        match effect {
            AvailabilityEffect::Claim => Some(AvailabilityChange::Claim(car_id)),
            AvailabilityEffect::Release => Some(AvailabilityChange::Release(car_id)),
            AvailabilityEffect::Unchanged => None,
        }
    }

    pub async fn reconcile(&self, car_id: Uuid) -> Result<Option<Repair>, BookingError> {
        let car = self
            .store
            .find_car(car_id)
            .await?
            .ok_or(BookingError::NotFound {
                entity: "car",
                id: car_id,
            })?;
        let held = self
            .store
            .find_leases(&Filter::equals(LeaseField::Car, car_id))
            .await?
            .iter()
            .any(|lease| lease.payment_status.holds_car());
        self.repair(&car, held).await
    }

    /// Reads every car before the holding leases. A car whose flag moved after that
    /// read is skipped by the conditional repair write.
    pub async fn reconcile_all(&self) -> Result<Vec<Repair>, BookingError> {
        let cars = self.store.find_cars(&Filter::All, None).await?;
        let held: HashSet<Uuid> = self
            .store
            .find_leases(&holding_leases())
            .await?
            .iter()
            .map(|lease| lease.car_id())
            .collect();

        let mut repairs = Vec::new();
        for car in cars {
            if let Some(repair) = self.repair(&car, held.contains(&car.id)).await? {
                repairs.push(repair);
            }
        }
        Ok(repairs)
    }

    async fn repair(&self, car: &Car, held: bool) -> Result<Option<Repair>, BookingError> {
        let expected = !held;
        if car.available == expected {
            return Ok(None);
        }

        // Conditional on the value we read so a concurrent lease commit is not overwritten.
        if !self
            .store
            .set_car_availability(car.id, expected, Some(car.available))
            .await?
        {
            warn!("Car {} changed during reconciliation, skipping", car.id);
            return Ok(None);
        }

        warn!(
            "Repaired availability of car {}: {} -> {}",
            car.id, car.available, expected
        );
        Ok(Some(Repair {
            car_id: car.id,
            was_available: car.available,
            available: expected,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StoreError;
    use crate::store::memory::InMemoryStore;
    use crate::store::{
        CarField, CustomerField, LeaseCommit, LeaseWrite, NewContactMessage, NewCustomer,
        NewLease, NewReview, ReviewField, StoredCustomer,
    };
    use async_trait::async_trait;
    use bigdecimal::BigDecimal;
    use chrono::Utc;
    use shared::{
        CarCategory, CarPatch, ContactMessage, ContactStatus, Customer, CustomerPatch, FuelType,
        Lease, LeaseEventType, LeaseType, NewCar, OutboxEvent, Review, Transmission,
    };
    use std::sync::atomic::{AtomicBool, Ordering};

    fn booking(car_id: Uuid) -> LeaseCommit {
        let now = Utc::now();
        LeaseCommit {
            write: LeaseWrite::Insert(NewLease {
                id: Uuid::new_v4(),
                car_id,
                customer_id: Uuid::new_v4(),
                lease_type: LeaseType::Daily,
                start_date: now,
                end_date: now,
                pickup_location: "CBD".to_string(),
                return_location: "CBD".to_string(),
                notes: None,
                total_amount: BigDecimal::from(2500),
                payment_status: PaymentStatus::Pending,
            }),
            availability: Some(AvailabilityChange::Claim(car_id)),
            event_type: LeaseEventType::LeaseCreated,
            idempotency_key: None,
        }
    }

    /// Books `car_id` the first time the fleet is listed, before answering.
    struct BookDuringListing {
        inner: Arc<InMemoryStore>,
        car_id: Uuid,
        booked: AtomicBool,
    }

    #[async_trait]
    impl RecordStore for BookDuringListing {
        async fn find_cars(
            &self,
            filter: &Filter<CarField>,
            limit: Option<i64>,
        ) -> Result<Vec<Car>, StoreError> {
            if !self.booked.swap(true, Ordering::SeqCst) {
                self.inner.commit(booking(self.car_id)).await?;
            }
            self.inner.find_cars(filter, limit).await
        }
        async fn find_car(&self, id: Uuid) -> Result<Option<Car>, StoreError> {
            self.inner.find_car(id).await
        }
        async fn create_car(&self, car: NewCar) -> Result<Car, StoreError> {
            self.inner.create_car(car).await
        }
        async fn update_car(&self, id: Uuid, patch: CarPatch) -> Result<Car, StoreError> {
            self.inner.update_car(id, patch).await
        }
        async fn set_car_availability(
            &self,
            id: Uuid,
            available: bool,
            expected: Option<bool>,
        ) -> Result<bool, StoreError> {
            self.inner.set_car_availability(id, available, expected).await
        }
        async fn find_customers(
            &self,
            filter: &Filter<CustomerField>,
        ) -> Result<Vec<Customer>, StoreError> {
            self.inner.find_customers(filter).await
        }
        async fn find_customer(&self, id: Uuid) -> Result<Option<Customer>, StoreError> {
            self.inner.find_customer(id).await
        }
        async fn find_credentials(
            &self,
            email: &str,
        ) -> Result<Option<StoredCustomer>, StoreError> {
            self.inner.find_credentials(email).await
        }
        async fn create_customer(&self, customer: NewCustomer) -> Result<Customer, StoreError> {
            self.inner.create_customer(customer).await
        }
        async fn update_customer(
            &self,
            id: Uuid,
            patch: CustomerPatch,
        ) -> Result<Customer, StoreError> {
            self.inner.update_customer(id, patch).await
        }
        async fn find_leases(&self, filter: &Filter<LeaseField>) -> Result<Vec<Lease>, StoreError> {
            self.inner.find_leases(filter).await
        }
        async fn find_lease(&self, id: Uuid) -> Result<Option<Lease>, StoreError> {
            self.inner.find_lease(id).await
        }
        async fn commit(&self, commit: LeaseCommit) -> Result<Lease, StoreError> {
            self.inner.commit(commit).await
        }
        async fn find_processed_command(
            &self,
            idempotency_key: &str,
        ) -> Result<Option<Uuid>, StoreError> {
            self.inner.find_processed_command(idempotency_key).await
        }
        async fn find_reviews(
            &self,
            filter: &Filter<ReviewField>,
            limit: Option<i64>,
        ) -> Result<Vec<Review>, StoreError> {
            self.inner.find_reviews(filter, limit).await
        }
        async fn create_review(&self, review: NewReview) -> Result<Review, StoreError> {
            self.inner.create_review(review).await
        }
        async fn set_review_approval(
            &self,
            id: Uuid,
            approved: bool,
        ) -> Result<Review, StoreError> {
            self.inner.set_review_approval(id, approved).await
        }
        async fn create_contact_message(
            &self,
            message: NewContactMessage,
        ) -> Result<ContactMessage, StoreError> {
            self.inner.create_contact_message(message).await
        }
        async fn find_contact_messages(&self) -> Result<Vec<ContactMessage>, StoreError> {
            self.inner.find_contact_messages().await
        }
        async fn set_contact_status(
            &self,
            id: Uuid,
            status: ContactStatus,
        ) -> Result<ContactMessage, StoreError> {
            self.inner.set_contact_status(id, status).await
        }
        async fn pending_outbox_events(&self, limit: i64) -> Result<Vec<OutboxEvent>, StoreError> {
            self.inner.pending_outbox_events(limit).await
        }
        async fn mark_outbox_processed(&self, id: Uuid) -> Result<(), StoreError> {
            self.inner.mark_outbox_processed(id).await
        }
    }

    async fn setup() -> (Arc<InMemoryStore>, AvailabilityLedger, Uuid) {
        let store = Arc::new(InMemoryStore::new());
        let car = store
            .create_car(NewCar {
                make: "Mazda".to_string(),
                model: "Demio".to_string(),
                year: 2018,
                category: CarCategory::Hatchback,
                transmission: Transmission::Manual,
                fuel_type: FuelType::Gasoline,
                seats: 5,
                doors: 5,
                daily_rate: BigDecimal::from(2500),
                monthly_rate: BigDecimal::from(60000),
                location: None,
                mileage: None,
                license_plate: None,
                description: None,
            })
            .await
            .unwrap();
        let ledger = AvailabilityLedger::new(store.clone());
        (store, ledger, car.id)
    }

    #[tokio::test]
    async fn marking_an_unavailable_car_unavailable_fails() {
        let (_, ledger, car_id) = setup().await;
        ledger.mark_unavailable(car_id).await.unwrap();
        assert!(matches!(
            ledger.mark_unavailable(car_id).await,
            Err(BookingError::CarUnavailable(id)) if id == car_id
        ));
        ledger.mark_available(car_id).await.unwrap();
        ledger.mark_unavailable(car_id).await.unwrap();
    }

    #[tokio::test]
    async fn missing_cars_are_not_found() {
        let (_, ledger, _) = setup().await;
        assert!(matches!(
            ledger.mark_available(Uuid::new_v4()).await,
            Err(BookingError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn reconcile_releases_a_car_nobody_holds() {
        let (store, ledger, car_id) = setup().await;
        store.force_availability(car_id, false).await;

        let repair = ledger.reconcile(car_id).await.unwrap().unwrap();

        assert!(!repair.was_available);
        assert!(repair.available);
        assert!(store.find_car(car_id).await.unwrap().unwrap().available);
        assert_eq!(ledger.reconcile_all().await.unwrap(), vec![]);
    }

    #[tokio::test]
    async fn sweep_keeps_a_car_booked_while_it_runs() {
        let (store, _, car_id) = setup().await;
        let ledger = AvailabilityLedger::new(Arc::new(BookDuringListing {
            inner: store.clone(),
            car_id,
            booked: AtomicBool::new(false),
        }));

        let repairs = ledger.reconcile_all().await.unwrap();

        assert_eq!(repairs, vec![]);
        assert!(!store.find_car(car_id).await.unwrap().unwrap().available);
        let pending = store
            .find_leases(&Filter::equals(LeaseField::Car, car_id))
            .await
            .unwrap();
        assert_eq!(pending.len(), 1);
    }

    #[tokio::test]
    async fn released_leases_do_not_hold_the_car() {
        let (store, ledger, car_id) = setup().await;
        let lease = store.commit(booking(car_id)).await.unwrap();
        store
            .commit(LeaseCommit {
                write: LeaseWrite::Transition {
                    lease_id: lease.id,
                    from: PaymentStatus::Pending,
                    to: PaymentStatus::Cancelled,
                },
                availability: None,
                event_type: LeaseEventType::LeaseCancelled,
                idempotency_key: None,
            })
            .await
            .unwrap();

        let repair = ledger.reconcile(car_id).await.unwrap().unwrap();

        assert!(!repair.was_available);
        assert!(store.find_car(car_id).await.unwrap().unwrap().available);
    }

    #[test]
    fn effects_map_to_store_changes() {
        let store: Arc<dyn RecordStore> = Arc::new(InMemoryStore::new());
        let ledger = AvailabilityLedger::new(store);
        let id = Uuid::new_v4();
        assert_eq!(
            ledger.change_for(id, AvailabilityEffect::Claim),
            Some(AvailabilityChange::Claim(id))
        );
        assert_eq!(
            ledger.change_for(id, AvailabilityEffect::Release),
            Some(AvailabilityChange::Release(id))
        );
        assert_eq!(ledger.change_for(id, AvailabilityEffect::Unchanged), None);
    }
}
