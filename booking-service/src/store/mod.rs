//! Record store: typed collections for cars, customers, leases, reviews and contact
//! messages, queried with composable filters.
//!
//! Lease lifecycle changes go through [`RecordStore::commit`], which applies the lease
//! write, the car availability write, the outbox event and the idempotency record as
//! one unit. Implementations: [`postgres::PgStore`] and [`memory::InMemoryStore`].

pub mod memory;
pub mod postgres;

use crate::error::StoreError;
use async_trait::async_trait;
use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use shared::{
    Car, CarCategory, CarPatch, ContactMessage, ContactStatus, Customer, CustomerPatch,
    FuelType, Lease, LeaseEventType, LeaseType, NewCar, OutboxEvent, PaymentStatus, Rating,
    Review, Transmission,
};
use std::cmp::Ordering;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Id(Uuid),
    Text(String),
    Int(i64),
    Decimal(BigDecimal),
    Bool(bool),
}

impl Value {
    fn compare(&self, other: &Value) -> Option<Ordering> {
        match (self, other) {
            (Value::Int(a), Value::Int(b)) => a.partial_cmp(b),
            (Value::Decimal(a), Value::Decimal(b)) => a.partial_cmp(b),
            (Value::Decimal(a), Value::Int(b)) => a.partial_cmp(&BigDecimal::from(*b)),
            (Value::Int(a), Value::Decimal(b)) => BigDecimal::from(*a).partial_cmp(b),
            (Value::Text(a), Value::Text(b)) => a.partial_cmp(b),
            _ => None,
        }
    }
}

impl From<Uuid> for Value {
    fn from(id: Uuid) -> Self {
        Value::Id(id)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(s.to_string())
    }
}

impl From<BigDecimal> for Value {
    fn from(d: BigDecimal) -> Self {
        Value::Decimal(d)
    }
}

macro_rules! text_value {
    ($($ty:ty),+) => {
        $(impl From<$ty> for Value {
            fn from(v: $ty) -> Self {
                Value::Text(v.as_str().to_string())
            }
        })+
    };
}

text_value!(PaymentStatus, CarCategory, Transmission, FuelType, Rating);

/// Query predicate over the fields `F` of one collection.
#[derive(Debug, Clone, PartialEq)]
pub enum Filter<F> {
    All,
    Equals(F, Value),
    LessThanEqual(F, Value),
    /// Case-insensitive substring match.
    Like(F, String),
    And(Vec<Filter<F>>),
    Or(Vec<Filter<F>>),
}

impl<F: Copy> Filter<F> {
    pub fn equals(field: F, value: impl Into<Value>) -> Self {
        Filter::Equals(field, value.into())
    }

    pub fn and(self, other: Filter<F>) -> Self {
        match (self, other) {
            (Filter::All, other) | (other, Filter::All) => other,
            (Filter::And(mut parts), other) => {
                parts.push(other);
                Filter::And(parts)
            }
            (this, other) => Filter::And(vec![this, other]),
        }
    }

    pub fn matches<R: Record<Field = F>>(&self, record: &R) -> bool {
        match self {
            Filter::All => true,
            Filter::Equals(field, value) => record.value(*field) == *value,
            Filter::LessThanEqual(field, value) => matches!(
                record.value(*field).compare(value),
                Some(Ordering::Less | Ordering::Equal)
            ),
            Filter::Like(field, pattern) => match record.value(*field) {
                Value::Text(text) => text.to_lowercase().contains(&pattern.to_lowercase()),
                _ => false,
            },
            Filter::And(parts) => parts.iter().all(|part| part.matches(record)),
            Filter::Or(parts) => parts.iter().any(|part| part.matches(record)),
        }
    }
}

pub trait Record {
    type Field: Copy;

    fn value(&self, field: Self::Field) -> Value;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CarField {
    Make,
    Model,
    Year,
    Category,
    Transmission,
    FuelType,
    DailyRate,
    Available,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CustomerField {
    Email,
    IsValid,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeaseField {
    Car,
    Customer,
    PaymentStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReviewField {
    Author,
    CarRented,
    Approved,
    Rating,
}

impl Record for Car {
    type Field = CarField;

    fn value(&self, field: CarField) -> Value {
        match field {
            CarField::Make => Value::Text(self.make.clone()),
            CarField::Model => Value::Text(self.model.clone()),
            CarField::Year => Value::Int(i64::from(self.year)),
            CarField::Category => self.category.into(),
            CarField::Transmission => self.transmission.into(),
            CarField::FuelType => self.fuel_type.into(),
            CarField::DailyRate => Value::Decimal(self.daily_rate.clone()),
            CarField::Available => Value::Bool(self.available),
        }
    }
}

impl Record for Customer {
    type Field = CustomerField;

    fn value(&self, field: CustomerField) -> Value {
        match field {
            CustomerField::Email => Value::Text(self.email.clone()),
            CustomerField::IsValid => Value::Bool(self.is_valid),
        }
    }
}

impl Record for Lease {
    type Field = LeaseField;

    fn value(&self, field: LeaseField) -> Value {
        match field {
            LeaseField::Car => Value::Id(self.car_id()),
            LeaseField::Customer => Value::Id(self.customer_id()),
            LeaseField::PaymentStatus => Value::from(self.payment_status),
        }
    }
}

impl Record for Review {
    type Field = ReviewField;

    fn value(&self, field: ReviewField) -> Value {
        match field {
            ReviewField::Author => Value::Id(self.author.id()),
            ReviewField::CarRented => Value::Id(self.car_rented.id()),
            ReviewField::Approved => Value::Bool(self.approved),
            ReviewField::Rating => self.rating.into(),
        }
    }
}

/// A customer row together with its credential, which never leaves the store layer
/// except through this type.
#[derive(Debug, Clone)]
pub struct StoredCustomer {
    pub customer: Customer,
    pub password_hash: String,
}

#[derive(Debug, Clone)]
pub struct NewCustomer {
    pub email: String,
    pub password_hash: String,
    pub first_name: String,
    pub last_name: String,
    pub phone_number: Option<String>,
    pub address: Option<String>,
}

#[derive(Debug, Clone)]
pub struct NewLease {
    pub id: Uuid,
    pub car_id: Uuid,
    pub customer_id: Uuid,
    pub lease_type: LeaseType,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    pub pickup_location: String,
    pub return_location: String,
    pub notes: Option<String>,
    pub total_amount: BigDecimal,
    pub payment_status: PaymentStatus,
}

#[derive(Debug, Clone)]
pub struct NewReview {
    pub author_id: Uuid,
    pub car_id: Uuid,
    pub rating: Rating,
    pub review_text: String,
    pub approved: bool,
}

#[derive(Debug, Clone)]
pub struct NewContactMessage {
    pub fullname: String,
    pub email: String,
    pub message: String,
}

#[derive(Debug, Clone)]
pub enum LeaseWrite {
    Insert(NewLease),
    /// Applied only while the lease is still in `from`.
    Transition {
        lease_id: Uuid,
        from: PaymentStatus,
        to: PaymentStatus,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AvailabilityChange {
    /// `available = false`, applied only while the car is still available.
    Claim(Uuid),
    Release(Uuid),
}

impl AvailabilityChange {
    pub fn car_id(&self) -> Uuid {
        match self {
            AvailabilityChange::Claim(id) | AvailabilityChange::Release(id) => *id,
        }
    }

    pub fn resulting_availability(&self) -> bool {
        matches!(self, AvailabilityChange::Release(_))
    }
}

#[derive(Debug, Clone)]
pub struct LeaseCommit {
    pub write: LeaseWrite,
    pub availability: Option<AvailabilityChange>,
    pub event_type: LeaseEventType,
    pub idempotency_key: Option<String>,
}

#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn find_cars(
        &self,
        filter: &Filter<CarField>,
        limit: Option<i64>,
    ) -> Result<Vec<Car>, StoreError>;
    async fn find_car(&self, id: Uuid) -> Result<Option<Car>, StoreError>;
    async fn create_car(&self, car: NewCar) -> Result<Car, StoreError>;
    async fn update_car(&self, id: Uuid, patch: CarPatch) -> Result<Car, StoreError>;
    /// Single-record availability write. With `expected`, only applies when the
    /// current flag matches it. Returns whether a row changed.
    async fn set_car_availability(
        &self,
        id: Uuid,
        available: bool,
        expected: Option<bool>,
    ) -> Result<bool, StoreError>;

    async fn find_customers(
        &self,
        filter: &Filter<CustomerField>,
    ) -> Result<Vec<Customer>, StoreError>;
    async fn find_customer(&self, id: Uuid) -> Result<Option<Customer>, StoreError>;
    async fn find_credentials(&self, email: &str) -> Result<Option<StoredCustomer>, StoreError>;
    async fn create_customer(&self, customer: NewCustomer) -> Result<Customer, StoreError>;
    async fn update_customer(
        &self,
        id: Uuid,
        patch: CustomerPatch,
    ) -> Result<Customer, StoreError>;

    async fn find_leases(&self, filter: &Filter<LeaseField>) -> Result<Vec<Lease>, StoreError>;
    async fn find_lease(&self, id: Uuid) -> Result<Option<Lease>, StoreError>;
    async fn commit(&self, commit: LeaseCommit) -> Result<Lease, StoreError>;
    async fn find_processed_command(
        &self,
        idempotency_key: &str,
    ) -> Result<Option<Uuid>, StoreError>;

    async fn find_reviews(
        &self,
        filter: &Filter<ReviewField>,
        limit: Option<i64>,
    ) -> Result<Vec<Review>, StoreError>;
    async fn create_review(&self, review: NewReview) -> Result<Review, StoreError>;
    async fn set_review_approval(&self, id: Uuid, approved: bool) -> Result<Review, StoreError>;

    async fn create_contact_message(
        &self,
        message: NewContactMessage,
    ) -> Result<ContactMessage, StoreError>;
    async fn find_contact_messages(&self) -> Result<Vec<ContactMessage>, StoreError>;
    async fn set_contact_status(
        &self,
        id: Uuid,
        status: ContactStatus,
    ) -> Result<ContactMessage, StoreError>;

    async fn pending_outbox_events(&self, limit: i64) -> Result<Vec<OutboxEvent>, StoreError>;
    async fn mark_outbox_processed(&self, id: Uuid) -> Result<(), StoreError>;
}

pub(crate) fn new_car_record(car: NewCar, now: DateTime<Utc>) -> Car {
    Car {
        id: Uuid::new_v4(),
        make: car.make,
        model: car.model,
        year: car.year,
        category: car.category,
        transmission: car.transmission,
        fuel_type: car.fuel_type,
        seats: car.seats,
        doors: car.doors,
        daily_rate: car.daily_rate,
        monthly_rate: car.monthly_rate,
        available: true,
        location: car.location,
        mileage: car.mileage,
        license_plate: car.license_plate,
        description: car.description,
        created_at: now,
        updated_at: now,
    }
}

fn replace<T>(target: &mut T, value: Option<T>) {
    if let Some(value) = value {
        *target = value;
    }
}

fn replace_opt<T>(target: &mut Option<T>, value: Option<T>) {
    if value.is_some() {
        *target = value;
    }
}

pub(crate) fn apply_car_patch(car: &mut Car, patch: CarPatch) {
    replace(&mut car.make, patch.make);
    replace(&mut car.model, patch.model);
    replace(&mut car.year, patch.year);
    replace(&mut car.category, patch.category);
    replace(&mut car.transmission, patch.transmission);
    replace(&mut car.fuel_type, patch.fuel_type);
    replace(&mut car.seats, patch.seats);
    replace(&mut car.doors, patch.doors);
    replace(&mut car.daily_rate, patch.daily_rate);
    replace(&mut car.monthly_rate, patch.monthly_rate);
    replace_opt(&mut car.location, patch.location);
    replace_opt(&mut car.mileage, patch.mileage);
    replace_opt(&mut car.license_plate, patch.license_plate);
    replace_opt(&mut car.description, patch.description);
}

pub(crate) fn apply_customer_patch(customer: &mut Customer, patch: CustomerPatch) {
    replace(&mut customer.first_name, patch.first_name);
    replace(&mut customer.last_name, patch.last_name);
    replace_opt(&mut customer.id_number, patch.id_number);
    replace_opt(&mut customer.phone_number, patch.phone_number);
    replace_opt(&mut customer.address, patch.address);
    replace_opt(&mut customer.license_number, patch.license_number);
    replace_opt(&mut customer.license_expiry_date, patch.license_expiry_date);
    replace(&mut customer.is_valid, patch.is_valid);
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::Relation;

    fn lease(status: PaymentStatus, car_id: Uuid) -> Lease {
        let now = Utc::now();
        Lease {
            id: Uuid::new_v4(),
            car: Relation::Reference(car_id),
            customer: Relation::Reference(Uuid::new_v4()),
            lease_type: LeaseType::Daily,
            start_date: now,
            end_date: now,
            pickup_location: "CBD".to_string(),
            return_location: "CBD".to_string(),
            notes: None,
            total_amount: BigDecimal::from(1),
            payment_status: status,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn and_or_compose() {
        let car_id = Uuid::new_v4();
        let active = Filter::equals(LeaseField::Car, car_id).and(Filter::Or(vec![
            Filter::equals(LeaseField::PaymentStatus, PaymentStatus::Pending),
            Filter::equals(LeaseField::PaymentStatus, PaymentStatus::Paid),
        ]));

        assert!(active.matches(&lease(PaymentStatus::Pending, car_id)));
        assert!(active.matches(&lease(PaymentStatus::Paid, car_id)));
        assert!(!active.matches(&lease(PaymentStatus::Cancelled, car_id)));
        assert!(!active.matches(&lease(PaymentStatus::Paid, Uuid::new_v4())));
    }

    #[test]
    fn and_with_all_collapses() {
        let filter = Filter::<LeaseField>::All.and(Filter::equals(LeaseField::Car, Uuid::nil()));
        assert!(matches!(filter, Filter::Equals(LeaseField::Car, _)));
    }

    #[test]
    fn less_than_equal_compares_decimals_with_ints() {
        let rate = Value::Decimal(BigDecimal::from(4999));
        assert_eq!(rate.compare(&Value::Int(5000)), Some(Ordering::Less));
        assert_eq!(Value::Int(5000).compare(&rate), Some(Ordering::Greater));
        assert_eq!(Value::Bool(true).compare(&Value::Int(1)), None);
    }

    #[test]
    fn like_is_case_insensitive_substring() {
        let car_id = Uuid::new_v4();
        let by_status = Filter::Like(LeaseField::PaymentStatus, "PEND".to_string());
        assert!(by_status.matches(&lease(PaymentStatus::Pending, car_id)));
        assert!(!by_status.matches(&lease(PaymentStatus::Paid, car_id)));
    }
}
