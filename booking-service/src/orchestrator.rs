use crate::error::{logged, BookingError, StoreError};
use crate::forms::{CreateLeaseForm, LeaseRequest, ReviewForm};
use crate::lease_machine::{LeaseStateMachine, LeaseTrigger};
use crate::ledger::AvailabilityLedger;
use crate::store::{
    Filter, LeaseCommit, LeaseField, LeaseWrite, NewLease, NewReview, RecordStore, ReviewField,
};
use serde::Serialize;
use shared::{quote, Customer, Lease, PaymentStatus, PricingError, Relation, Review};
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Copy)]
pub struct BookingPolicy {
    pub release_car_on_refund: bool,
    pub auto_approve_reviews: bool,
}

impl Default for BookingPolicy {
    fn default() -> Self {
        Self {
            release_car_on_refund: true,
            auto_approve_reviews: true,
        }
    }
}

/// Who is asking for a lease change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Actor {
    Customer(Uuid),
    Admin,
    System,
}

impl Actor {
    fn may_act_on(&self, lease: &Lease) -> bool {
        match self {
            Actor::Customer(id) => lease.customer_id() == *id,
            Actor::Admin | Actor::System => true,
        }
    }

    fn is_staff(&self) -> bool {
        !matches!(self, Actor::Customer(_))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FailedCancel {
    pub lease_id: Uuid,
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchCancelReport {
    pub cancelled: Vec<Uuid>,
    pub failed: Vec<FailedCancel>,
}

fn lost_to_concurrent_commit(err: &BookingError) -> bool {
    matches!(
        err,
        BookingError::CarUnavailable(_) | BookingError::Store(StoreError::Duplicate(_))
    )
}

fn pricing_error(err: PricingError) -> BookingError {
    match err {
        PricingError::EndNotAfterStart => BookingError::validation("endDate", err.to_string()),
        PricingError::NegativeRate => BookingError::Internal(err.to_string()),
    }
}

#[derive(Clone)]
pub struct BookingOrchestrator {
    store: Arc<dyn RecordStore>,
    ledger: AvailabilityLedger,
    machine: LeaseStateMachine,
    policy: BookingPolicy,
}

impl BookingOrchestrator {
    pub fn new(store: Arc<dyn RecordStore>, policy: BookingPolicy) -> Self {
        Self {
            ledger: AvailabilityLedger::new(store.clone()),
            machine: LeaseStateMachine::new(policy.release_car_on_refund),
            store,
            policy,
        }
    }

    pub fn ledger(&self) -> &AvailabilityLedger {
        &self.ledger
    }

    pub async fn create_lease(
        &self,
        car_id: Uuid,
        customer: &Customer,
        form: &CreateLeaseForm,
        idempotency_key: Option<&str>,
    ) -> Result<Lease, BookingError> {
        self.try_create_lease(car_id, customer, form, idempotency_key)
            .await
            .map_err(logged("create_lease"))
    }

    async fn try_create_lease(
        &self,
        car_id: Uuid,
        customer: &Customer,
        form: &CreateLeaseForm,
        idempotency_key: Option<&str>,
    ) -> Result<Lease, BookingError> {
        let request = form.parse()?;

        // Keys are scoped to the customer so one client cannot replay another's booking.
        let idempotency_key = idempotency_key.map(|key| format!("{}:{}", customer.id, key));
        if let Some(key) = &idempotency_key {
            if let Some(lease) = self.replay(key, car_id).await? {
                return Ok(lease);
            }
        }

        match self
            .book(car_id, customer, request, idempotency_key.clone())
            .await
        {
            // A concurrent request with the same key may have committed first.
            Err(err) if lost_to_concurrent_commit(&err) => match &idempotency_key {
                Some(key) => self.replay(key, car_id).await?.ok_or(err),
                None => Err(err),
            },
            result => result,
        }
    }

    /// The lease recorded under `key`, provided it books the same car.
    async fn replay(&self, key: &str, car_id: Uuid) -> Result<Option<Lease>, BookingError> {
        let lease_id = match self.store.find_processed_command(key).await? {
            Some(lease_id) => lease_id,
            None => return Ok(None),
        };
        let lease = self.find_lease(lease_id).await?;
        if lease.car_id() != car_id {
            return Err(BookingError::validation(
                "idempotencyKey",
                "Idempotency key was already used for another car",
            ));
        }
        info!("Lease request {} already processed, returning lease {}", key, lease_id);
        Ok(Some(lease))
    }

    async fn book(
        &self,
        car_id: Uuid,
        customer: &Customer,
        request: LeaseRequest,
        idempotency_key: Option<String>,
    ) -> Result<Lease, BookingError> {
        let car = self
            .store
            .find_car(car_id)
            .await?
            .ok_or(BookingError::NotFound {
                entity: "car",
                id: car_id,
            })?;
        if !car.available {
            return Err(BookingError::CarUnavailable(car_id));
        }

        let transition = self
            .machine
            .transition(None, LeaseTrigger::Create)
            .map_err(|e| BookingError::Internal(e.to_string()))?;
        let total_amount = quote(&car, request.lease_type, request.start_date, request.end_date)
            .map_err(pricing_error)?;

        let lease = self
            .store
            .commit(LeaseCommit {
                write: LeaseWrite::Insert(NewLease {
                    id: Uuid::new_v4(),
                    car_id,
                    customer_id: customer.id,
                    lease_type: request.lease_type,
                    start_date: request.start_date,
                    end_date: request.end_date,
                    pickup_location: request.pickup_location,
                    return_location: request.return_location,
                    notes: request.notes,
                    total_amount,
                    payment_status: transition.to,
                }),
                availability: self.ledger.change_for(car_id, transition.effect),
                event_type: transition.event,
                idempotency_key,
            })
            .await?;

        info!(
            "Lease {} created for car {} by customer {} ({})",
            lease.id, car_id, customer.id, lease.total_amount
        );
        Ok(lease)
    }

    pub async fn cancel_lease(&self, lease_id: Uuid, actor: Actor) -> Result<Lease, BookingError> {
        self.apply(lease_id, actor, LeaseTrigger::Cancel)
            .await
            .map_err(logged("cancel_lease"))
    }

    pub async fn mark_paid(&self, lease_id: Uuid, actor: Actor) -> Result<Lease, BookingError> {
        self.apply(lease_id, actor, LeaseTrigger::ConfirmPayment)
            .await
            .map_err(logged("mark_paid"))
    }

    pub async fn refund_lease(&self, lease_id: Uuid) -> Result<Lease, BookingError> {
        self.apply(lease_id, Actor::Admin, LeaseTrigger::Refund)
            .await
            .map_err(logged("refund_lease"))
    }

    async fn apply(
        &self,
        lease_id: Uuid,
        actor: Actor,
        trigger: LeaseTrigger,
    ) -> Result<Lease, BookingError> {
        let lease = self.find_lease(lease_id).await?;
        if !actor.may_act_on(&lease) || (trigger == LeaseTrigger::Refund && !actor.is_staff()) {
            return Err(BookingError::Forbidden);
        }

        let from = lease.payment_status;
        let transition = self
            .machine
            .transition(Some(from), trigger)
            .map_err(|_| BookingError::InvalidTransition {
                lease_id,
                from,
                action: trigger.verb(),
            })?;

        let updated = self
            .store
            .commit(LeaseCommit {
                write: LeaseWrite::Transition {
                    lease_id,
                    from,
                    to: transition.to,
                },
                availability: self.ledger.change_for(lease.car_id(), transition.effect),
                event_type: transition.event,
                idempotency_key: None,
            })
            .await?;

        info!(
            "Lease {} moved {} -> {} by {:?}",
            lease_id, from, updated.payment_status, actor
        );
        Ok(updated)
    }

    /// Cancels every pending lease of a customer, releasing each car.
    pub async fn cancel_pending_for_customer(
        &self,
        customer_id: Uuid,
    ) -> Result<BatchCancelReport, BookingError> {
        let pending = self
            .store
            .find_leases(
                &Filter::equals(LeaseField::Customer, customer_id)
                    .and(Filter::equals(LeaseField::PaymentStatus, PaymentStatus::Pending)),
            )
            .await
            .map_err(|e| logged("cancel_pending_for_customer")(e.into()))?;

        let mut report = BatchCancelReport::default();
        for lease in pending {
            match self.apply(lease.id, Actor::System, LeaseTrigger::Cancel).await {
                Ok(_) => report.cancelled.push(lease.id),
                Err(err) => {
                    warn!("Could not cancel lease {}: {}", lease.id, err);
                    report.failed.push(FailedCancel {
                        lease_id: lease.id,
                        reason: err.to_string(),
                    });
                }
            }
        }

        info!(
            "Cancelled {} pending leases for customer {} ({} failed)",
            report.cancelled.len(),
            customer_id,
            report.failed.len()
        );
        Ok(report)
    }

    pub async fn create_review(
        &self,
        car_id: Uuid,
        customer: &Customer,
        form: &ReviewForm,
    ) -> Result<Review, BookingError> {
        self.try_create_review(car_id, customer, form)
            .await
            .map_err(logged("create_review"))
    }

    async fn try_create_review(
        &self,
        car_id: Uuid,
        customer: &Customer,
        form: &ReviewForm,
    ) -> Result<Review, BookingError> {
        form.check()?;
        if self.store.find_car(car_id).await?.is_none() {
            return Err(BookingError::NotFound {
                entity: "car",
                id: car_id,
            });
        }

        let paid = self
            .store
            .find_leases(
                &Filter::equals(LeaseField::Customer, customer.id)
                    .and(Filter::equals(LeaseField::Car, car_id))
                    .and(Filter::equals(LeaseField::PaymentStatus, PaymentStatus::Paid)),
            )
            .await?;
        if paid.is_empty() {
            return Err(BookingError::ReviewNotAllowed {
                customer_id: customer.id,
                car_id,
            });
        }

        let existing = self
            .store
            .find_reviews(
                &Filter::equals(ReviewField::Author, customer.id)
                    .and(Filter::equals(ReviewField::CarRented, car_id)),
                Some(1),
            )
            .await?;
        if !existing.is_empty() {
            return Err(BookingError::DuplicateReview {
                customer_id: customer.id,
                car_id,
            });
        }

        let review = self
            .store
            .create_review(NewReview {
                author_id: customer.id,
                car_id,
                rating: form.rating,
                review_text: form.review_text.trim().to_string(),
                approved: self.policy.auto_approve_reviews,
            })
            .await?;
        info!("Review {} posted for car {} by {}", review.id, car_id, customer.id);
        Ok(review)
    }

    pub async fn leases_for_customer(&self, customer_id: Uuid) -> Result<Vec<Lease>, BookingError> {
        self.store
            .find_leases(&Filter::equals(LeaseField::Customer, customer_id))
            .await
            .map_err(|e| logged("leases_for_customer")(e.into()))
    }

    pub async fn all_leases(&self) -> Result<Vec<Lease>, BookingError> {
        self.store
            .find_leases(&Filter::All)
            .await
            .map_err(|e| logged("all_leases")(e.into()))
    }

    /// The customer's most recent lease on a car.
    pub async fn lease_for(
        &self,
        car_id: Uuid,
        customer_id: Uuid,
    ) -> Result<Option<Lease>, BookingError> {
        let leases = self
            .store
            .find_leases(
                &Filter::equals(LeaseField::Car, car_id)
                    .and(Filter::equals(LeaseField::Customer, customer_id)),
            )
            .await
            .map_err(|e| logged("lease_for")(e.into()))?;
        Ok(leases.into_iter().max_by_key(|lease| lease.created_at))
    }

    pub async fn get_lease(&self, lease_id: Uuid, actor: Actor) -> Result<Lease, BookingError> {
        let lease = self.find_lease(lease_id).await?;
        if !actor.may_act_on(&lease) {
            return Err(BookingError::Forbidden);
        }
        Ok(lease)
    }

    /// Resolves the car and customer references; missing records stay references.
    pub async fn expand(&self, mut lease: Lease) -> Result<Lease, BookingError> {
        if let Some(car) = self.store.find_car(lease.car_id()).await? {
            lease.car = Relation::Expanded(Box::new(car));
        }
        if let Some(customer) = self.store.find_customer(lease.customer_id()).await? {
            lease.customer = Relation::Expanded(Box::new(customer));
        }
        Ok(lease)
    }

    async fn find_lease(&self, lease_id: Uuid) -> Result<Lease, BookingError> {
        self.store
            .find_lease(lease_id)
            .await?
            .ok_or(BookingError::NotFound {
                entity: "lease",
                id: lease_id,
            })
    }
}
