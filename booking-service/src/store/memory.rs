use super::*;
use chrono::Utc;
use shared::{LeaseEvent, Relation};
use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};
use tokio::sync::Mutex;

#[derive(Default)]
struct Tables {
    cars: Vec<Car>,
    customers: Vec<StoredCustomer>,
    leases: Vec<Lease>,
    reviews: Vec<Review>,
    contact_messages: Vec<ContactMessage>,
    outbox_events: Vec<OutboxEvent>,
    processed_commands: Vec<(String, Uuid)>,
}

/// Process-local store. One lock guards every table, so a [`LeaseCommit`] is applied
/// in a single critical section.
#[derive(Default)]
pub struct InMemoryStore {
    tables: Mutex<Tables>,
    fail_writes: AtomicBool,
}

fn limited<T>(mut rows: Vec<T>, limit: Option<i64>) -> Vec<T> {
    if let Some(limit) = limit {
        rows.truncate(usize::try_from(limit.max(0)).unwrap_or(usize::MAX));
    }
    rows
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every subsequent write fail with [`StoreError::Unavailable`].
    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, AtomicOrdering::SeqCst);
    }

    /// Overwrites a car's flag without any lease bookkeeping.
    pub async fn force_availability(&self, car_id: Uuid, available: bool) {
        let mut tables = self.tables.lock().await;
        if let Some(car) = tables.cars.iter_mut().find(|c| c.id == car_id) {
            car.available = available;
        }
    }

    pub async fn outbox_len(&self) -> usize {
        self.tables.lock().await.outbox_events.len()
    }

    fn check_writable(&self) -> Result<(), StoreError> {
        if self.fail_writes.load(AtomicOrdering::SeqCst) {
            return Err(StoreError::Unavailable("writes disabled".to_string()));
        }
        Ok(())
    }
}

impl Tables {
    fn apply(&mut self, commit: LeaseCommit) -> Result<Lease, StoreError> {
        let now = Utc::now();

        // Validate everything before touching any table.
        let lease_index = match &commit.write {
            LeaseWrite::Insert(_) => None,
            LeaseWrite::Transition { lease_id, from, .. } => {
                let index = self
                    .leases
                    .iter()
                    .position(|l| l.id == *lease_id)
                    .ok_or(StoreError::NotFound {
                        collection: "lease",
                        id: *lease_id,
                    })?;
                if self.leases[index].payment_status != *from {
                    return Err(StoreError::StaleStatus {
                        lease_id: *lease_id,
                        expected: *from,
                    });
                }
                Some(index)
            }
        };
        if let Some(key) = &commit.idempotency_key {
            if self.processed_commands.iter().any(|(k, _)| k == key) {
                return Err(StoreError::Duplicate(format!("idempotency key {}", key)));
            }
        }
        let car_index = match commit.availability {
            None => None,
            Some(change) => {
                let car_id = change.car_id();
                let index = self
                    .cars
                    .iter()
                    .position(|c| c.id == car_id)
                    .ok_or(StoreError::NotFound {
                        collection: "car",
                        id: car_id,
                    })?;
                if matches!(change, AvailabilityChange::Claim(_)) && !self.cars[index].available {
                    return Err(StoreError::CarClaimed(car_id));
                }
                Some(index)
            }
        };

        let lease = match (commit.write, lease_index) {
            (LeaseWrite::Insert(new_lease), _) => {
                let lease = Lease {
                    id: new_lease.id,
                    car: Relation::Reference(new_lease.car_id),
                    customer: Relation::Reference(new_lease.customer_id),
                    lease_type: new_lease.lease_type,
                    start_date: new_lease.start_date,
                    end_date: new_lease.end_date,
                    pickup_location: new_lease.pickup_location,
                    return_location: new_lease.return_location,
                    notes: new_lease.notes,
                    total_amount: new_lease.total_amount,
                    payment_status: new_lease.payment_status,
                    created_at: now,
                    updated_at: now,
                };
                self.leases.push(lease.clone());
                lease
            }
            (LeaseWrite::Transition { to, .. }, Some(index)) => {
                let lease = &mut self.leases[index];
                lease.payment_status = to;
                lease.updated_at = now;
                lease.clone()
            }
            (LeaseWrite::Transition { lease_id, .. }, None) => {
                return Err(StoreError::NotFound {
                    collection: "lease",
                    id: lease_id,
                })
            }
        };

        let car_available = match (commit.availability, car_index) {
            (Some(change), Some(index)) => {
                let car = &mut self.cars[index];
                car.available = change.resulting_availability();
                car.updated_at = now;
                Some(car.available)
            }
            _ => None,
        };

        let event = LeaseEvent::new(commit.event_type, &lease, car_available);
        self.outbox_events.push(OutboxEvent::from_lease_event(&event)?);

        if let Some(key) = commit.idempotency_key {
            self.processed_commands.push((key, lease.id));
        }

        Ok(lease)
    }
}

#[async_trait]
impl RecordStore for InMemoryStore {
    async fn find_cars(
        &self,
        filter: &Filter<CarField>,
        limit: Option<i64>,
    ) -> Result<Vec<Car>, StoreError> {
        let tables = self.tables.lock().await;
        let rows = tables
            .cars
            .iter()
            .filter(|car| filter.matches(*car))
            .cloned()
            .collect();
        Ok(limited(rows, limit))
    }

    async fn find_car(&self, id: Uuid) -> Result<Option<Car>, StoreError> {
        let tables = self.tables.lock().await;
        Ok(tables.cars.iter().find(|c| c.id == id).cloned())
    }

    async fn create_car(&self, car: NewCar) -> Result<Car, StoreError> {
        self.check_writable()?;
        let car = new_car_record(car, Utc::now());
        self.tables.lock().await.cars.push(car.clone());
        Ok(car)
    }

    async fn update_car(&self, id: Uuid, patch: CarPatch) -> Result<Car, StoreError> {
        self.check_writable()?;
        let mut tables = self.tables.lock().await;
        let car = tables
            .cars
            .iter_mut()
            .find(|c| c.id == id)
            .ok_or(StoreError::NotFound {
                collection: "car",
                id,
            })?;
        apply_car_patch(car, patch);
        car.updated_at = Utc::now();
        Ok(car.clone())
    }

    async fn set_car_availability(
        &self,
        id: Uuid,
        available: bool,
        expected: Option<bool>,
    ) -> Result<bool, StoreError> {
        self.check_writable()?;
        let mut tables = self.tables.lock().await;
        let car = tables
            .cars
            .iter_mut()
            .find(|c| c.id == id)
            .ok_or(StoreError::NotFound {
                collection: "car",
                id,
            })?;
        if expected.is_some_and(|expected| car.available != expected) {
            return Ok(false);
        }
        car.available = available;
        car.updated_at = Utc::now();
        Ok(true)
    }

    async fn find_customers(
        &self,
        filter: &Filter<CustomerField>,
    ) -> Result<Vec<Customer>, StoreError> {
        let tables = self.tables.lock().await;
        Ok(tables
            .customers
            .iter()
            .map(|stored| &stored.customer)
            .filter(|customer| filter.matches(*customer))
            .cloned()
            .collect())
    }

    async fn find_customer(&self, id: Uuid) -> Result<Option<Customer>, StoreError> {
        let tables = self.tables.lock().await;
        Ok(tables
            .customers
            .iter()
            .find(|stored| stored.customer.id == id)
            .map(|stored| stored.customer.clone()))
    }

    async fn find_credentials(&self, email: &str) -> Result<Option<StoredCustomer>, StoreError> {
        let tables = self.tables.lock().await;
        Ok(tables
            .customers
            .iter()
            .find(|stored| stored.customer.email.eq_ignore_ascii_case(email))
            .cloned())
    }

    async fn create_customer(&self, customer: NewCustomer) -> Result<Customer, StoreError> {
        self.check_writable()?;
        let mut tables = self.tables.lock().await;
        if tables
            .customers
            .iter()
            .any(|stored| stored.customer.email.eq_ignore_ascii_case(&customer.email))
        {
            return Err(StoreError::Duplicate(format!("email {}", customer.email)));
        }
        let record = Customer {
            id: Uuid::new_v4(),
            email: customer.email,
            first_name: customer.first_name,
            last_name: customer.last_name,
            id_number: None,
            phone_number: customer.phone_number,
            address: customer.address,
            license_number: None,
            license_expiry_date: None,
            is_valid: false,
            created_at: Utc::now(),
        };
        tables.customers.push(StoredCustomer {
            customer: record.clone(),
            password_hash: customer.password_hash,
        });
        Ok(record)
    }

    async fn update_customer(
        &self,
        id: Uuid,
        patch: CustomerPatch,
    ) -> Result<Customer, StoreError> {
        self.check_writable()?;
        let mut tables = self.tables.lock().await;
        let stored = tables
            .customers
            .iter_mut()
            .find(|stored| stored.customer.id == id)
            .ok_or(StoreError::NotFound {
                collection: "customer",
                id,
            })?;
        apply_customer_patch(&mut stored.customer, patch);
        Ok(stored.customer.clone())
    }

    async fn find_leases(&self, filter: &Filter<LeaseField>) -> Result<Vec<Lease>, StoreError> {
        let tables = self.tables.lock().await;
        let mut rows: Vec<Lease> = tables
            .leases
            .iter()
            .filter(|lease| filter.matches(*lease))
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(rows)
    }

    async fn find_lease(&self, id: Uuid) -> Result<Option<Lease>, StoreError> {
        let tables = self.tables.lock().await;
        Ok(tables.leases.iter().find(|l| l.id == id).cloned())
    }

    async fn commit(&self, commit: LeaseCommit) -> Result<Lease, StoreError> {
        self.check_writable()?;
        let mut tables = self.tables.lock().await;
        tables.apply(commit)
    }

    async fn find_processed_command(
        &self,
        idempotency_key: &str,
    ) -> Result<Option<Uuid>, StoreError> {
        let tables = self.tables.lock().await;
        Ok(tables
            .processed_commands
            .iter()
            .find(|(key, _)| key == idempotency_key)
            .map(|(_, lease_id)| *lease_id))
    }

    async fn find_reviews(
        &self,
        filter: &Filter<ReviewField>,
        limit: Option<i64>,
    ) -> Result<Vec<Review>, StoreError> {
        let tables = self.tables.lock().await;
        let mut rows: Vec<Review> = tables
            .reviews
            .iter()
            .filter(|review| filter.matches(*review))
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(limited(rows, limit))
    }

    async fn create_review(&self, review: NewReview) -> Result<Review, StoreError> {
        self.check_writable()?;
        let record = Review {
            id: Uuid::new_v4(),
            author: Relation::Reference(review.author_id),
            car_rented: Relation::Reference(review.car_id),
            rating: review.rating,
            review_text: review.review_text,
            approved: review.approved,
            created_at: Utc::now(),
        };
        self.tables.lock().await.reviews.push(record.clone());
        Ok(record)
    }

    async fn set_review_approval(&self, id: Uuid, approved: bool) -> Result<Review, StoreError> {
        self.check_writable()?;
        let mut tables = self.tables.lock().await;
        let review = tables
            .reviews
            .iter_mut()
            .find(|r| r.id == id)
            .ok_or(StoreError::NotFound {
                collection: "review",
                id,
            })?;
        review.approved = approved;
        Ok(review.clone())
    }

    async fn create_contact_message(
        &self,
        message: NewContactMessage,
    ) -> Result<ContactMessage, StoreError> {
        self.check_writable()?;
        let record = ContactMessage {
            id: Uuid::new_v4(),
            fullname: message.fullname,
            email: message.email,
            message: message.message,
            status: ContactStatus::Pending,
            created_at: Utc::now(),
        };
        self.tables.lock().await.contact_messages.push(record.clone());
        Ok(record)
    }

    async fn find_contact_messages(&self) -> Result<Vec<ContactMessage>, StoreError> {
        let tables = self.tables.lock().await;
        let mut rows = tables.contact_messages.clone();
        rows.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(rows)
    }

    async fn set_contact_status(
        &self,
        id: Uuid,
        status: ContactStatus,
    ) -> Result<ContactMessage, StoreError> {
        self.check_writable()?;
        let mut tables = self.tables.lock().await;
        let message = tables
            .contact_messages
            .iter_mut()
            .find(|m| m.id == id)
            .ok_or(StoreError::NotFound {
                collection: "contact message",
                id,
            })?;
        message.status = status;
        Ok(message.clone())
    }

    async fn pending_outbox_events(&self, limit: i64) -> Result<Vec<OutboxEvent>, StoreError> {
        let tables = self.tables.lock().await;
        let rows = tables
            .outbox_events
            .iter()
            .filter(|event| !event.processed)
            .cloned()
            .collect();
        Ok(limited(rows, Some(limit)))
    }

    async fn mark_outbox_processed(&self, id: Uuid) -> Result<(), StoreError> {
        self.check_writable()?;
        let mut tables = self.tables.lock().await;
        let event = tables
            .outbox_events
            .iter_mut()
            .find(|e| e.id == id)
            .ok_or(StoreError::NotFound {
                collection: "outbox event",
                id,
            })?;
        event.processed = true;
        Ok(())
    }
}
