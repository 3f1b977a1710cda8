use crate::error::StoreError;
use crate::store::{NewContactMessage, NewCustomer, NewLease, NewReview, StoredCustomer};
use bigdecimal::BigDecimal;
use chrono::{DateTime, NaiveDate, Utc};
use diesel::prelude::*;
use shared::*;
use uuid::Uuid;

#[derive(Debug, Clone, Queryable, Selectable, Insertable)]
#[diesel(table_name = crate::schema::cars)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct DbCar {
    pub id: Uuid,
    pub make: String,
    pub model: String,
    pub year: i32,
    pub category: String,
    pub transmission: String,
    pub fuel_type: String,
    pub seats: i32,
    pub doors: i32,
    pub daily_rate: BigDecimal,
    pub monthly_rate: BigDecimal,
    pub available: bool,
    pub location: Option<String>,
    pub mileage: Option<i32>,
    pub license_plate: Option<String>,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Detail columns only; `available` is written through the ledger paths.
#[derive(Debug, Clone, AsChangeset)]
#[diesel(table_name = crate::schema::cars)]
pub struct DbCarChanges {
    pub make: Option<String>,
    pub model: Option<String>,
    pub year: Option<i32>,
    pub category: Option<String>,
    pub transmission: Option<String>,
    pub fuel_type: Option<String>,
    pub seats: Option<i32>,
    pub doors: Option<i32>,
    pub daily_rate: Option<BigDecimal>,
    pub monthly_rate: Option<BigDecimal>,
    pub location: Option<String>,
    pub mileage: Option<i32>,
    pub license_plate: Option<String>,
    pub description: Option<String>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = crate::schema::customers)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct DbCustomer {
    pub id: Uuid,
    pub email: String,
    pub password_hash: String,
    pub first_name: String,
    pub last_name: String,
    pub id_number: Option<i64>,
    pub phone_number: Option<String>,
    pub address: Option<String>,
    pub license_number: Option<String>,
    pub license_expiry_date: Option<NaiveDate>,
    pub is_valid: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = crate::schema::customers)]
pub struct DbNewCustomer {
    pub id: Uuid,
    pub email: String,
    pub password_hash: String,
    pub first_name: String,
    pub last_name: String,
    pub phone_number: Option<String>,
    pub address: Option<String>,
    pub is_valid: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, AsChangeset)]
#[diesel(table_name = crate::schema::customers)]
pub struct DbCustomerChanges {
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub id_number: Option<i64>,
    pub phone_number: Option<String>,
    pub address: Option<String>,
    pub license_number: Option<String>,
    pub license_expiry_date: Option<NaiveDate>,
    pub is_valid: Option<bool>,
}

#[derive(Debug, Clone, Queryable, Selectable, Insertable)]
#[diesel(table_name = crate::schema::leases)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct DbLease {
    pub id: Uuid,
    pub car_id: Uuid,
    pub customer_id: Uuid,
    pub lease_type: String,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    pub pickup_location: String,
    pub return_location: String,
    pub notes: Option<String>,
    pub total_amount: BigDecimal,
    pub payment_status: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Queryable, Selectable, Insertable)]
#[diesel(table_name = crate::schema::reviews)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct DbReview {
    pub id: Uuid,
    pub author_id: Uuid,
    pub car_id: Uuid,
    pub rating: String,
    pub review_text: String,
    pub approved: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Queryable, Selectable, Insertable)]
#[diesel(table_name = crate::schema::contact_messages)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct DbContactMessage {
    pub id: Uuid,
    pub fullname: String,
    pub email: String,
    pub message: String,
    pub status: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Queryable, Selectable, Insertable)]
#[diesel(table_name = crate::schema::outbox_events)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct DbOutboxEvent {
    pub id: Uuid,
    pub aggregate_id: Uuid,
    pub event_type: String,
    pub event_data: serde_json::Value,
    pub processed: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Queryable, Selectable, Insertable)]
#[diesel(table_name = crate::schema::processed_commands)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct ProcessedCommand {
    pub idempotency_key: String,
    pub lease_id: Uuid,
    pub processed_at: DateTime<Utc>,
}

impl From<Car> for DbCar {
    fn from(car: Car) -> Self {
        Self {
            id: car.id,
            make: car.make,
            model: car.model,
            year: car.year,
            category: car.category.as_str().to_string(),
            transmission: car.transmission.as_str().to_string(),
            fuel_type: car.fuel_type.as_str().to_string(),
            seats: car.seats,
            doors: car.doors,
            daily_rate: car.daily_rate,
            monthly_rate: car.monthly_rate,
            available: car.available,
            location: car.location,
            mileage: car.mileage,
            license_plate: car.license_plate,
            description: car.description,
            created_at: car.created_at,
            updated_at: car.updated_at,
        }
    }
}

impl TryFrom<DbCar> for Car {
    type Error = StoreError;

    fn try_from(row: DbCar) -> Result<Self, Self::Error> {
        Ok(Self {
            id: row.id,
            make: row.make,
            model: row.model,
            year: row.year,
            category: row.category.parse()?,
            transmission: row.transmission.parse()?,
            fuel_type: row.fuel_type.parse()?,
            seats: row.seats,
            doors: row.doors,
            daily_rate: row.daily_rate,
            monthly_rate: row.monthly_rate,
            available: row.available,
            location: row.location,
            mileage: row.mileage,
            license_plate: row.license_plate,
            description: row.description,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

impl DbCarChanges {
    pub fn from_patch(patch: CarPatch, now: DateTime<Utc>) -> Self {
        Self {
            make: patch.make,
            model: patch.model,
            year: patch.year,
            category: patch.category.map(|c| c.as_str().to_string()),
            transmission: patch.transmission.map(|t| t.as_str().to_string()),
            fuel_type: patch.fuel_type.map(|f| f.as_str().to_string()),
            seats: patch.seats,
            doors: patch.doors,
            daily_rate: patch.daily_rate,
            monthly_rate: patch.monthly_rate,
            location: patch.location,
            mileage: patch.mileage,
            license_plate: patch.license_plate,
            description: patch.description,
            updated_at: now,
        }
    }
}

impl From<DbCustomer> for StoredCustomer {
    fn from(row: DbCustomer) -> Self {
        Self {
            password_hash: row.password_hash,
            customer: Customer {
                id: row.id,
                email: row.email,
                first_name: row.first_name,
                last_name: row.last_name,
                id_number: row.id_number,
                phone_number: row.phone_number,
                address: row.address,
                license_number: row.license_number,
                license_expiry_date: row.license_expiry_date,
                is_valid: row.is_valid,
                created_at: row.created_at,
            },
        }
    }
}

impl From<DbCustomer> for Customer {
    fn from(row: DbCustomer) -> Self {
        StoredCustomer::from(row).customer
    }
}

impl DbNewCustomer {
    pub fn new(customer: NewCustomer, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            email: customer.email,
            password_hash: customer.password_hash,
            first_name: customer.first_name,
            last_name: customer.last_name,
            phone_number: customer.phone_number,
            address: customer.address,
            is_valid: false,
            created_at: now,
        }
    }
}

impl From<CustomerPatch> for DbCustomerChanges {
    fn from(patch: CustomerPatch) -> Self {
        Self {
            first_name: patch.first_name,
            last_name: patch.last_name,
            id_number: patch.id_number,
            phone_number: patch.phone_number,
            address: patch.address,
            license_number: patch.license_number,
            license_expiry_date: patch.license_expiry_date,
            is_valid: patch.is_valid,
        }
    }
}

impl DbLease {
    pub fn new(lease: NewLease, now: DateTime<Utc>) -> Self {
        Self {
            id: lease.id,
            car_id: lease.car_id,
            customer_id: lease.customer_id,
            lease_type: lease.lease_type.as_str().to_string(),
            start_date: lease.start_date,
            end_date: lease.end_date,
            pickup_location: lease.pickup_location,
            return_location: lease.return_location,
            notes: lease.notes,
            total_amount: lease.total_amount,
            payment_status: lease.payment_status.as_str().to_string(),
            created_at: now,
            updated_at: now,
        }
    }
}

impl TryFrom<DbLease> for Lease {
    type Error = StoreError;

    fn try_from(row: DbLease) -> Result<Self, Self::Error> {
        Ok(Self {
            id: row.id,
            car: Relation::Reference(row.car_id),
            customer: Relation::Reference(row.customer_id),
            lease_type: row.lease_type.parse()?,
            start_date: row.start_date,
            end_date: row.end_date,
            pickup_location: row.pickup_location,
            return_location: row.return_location,
            notes: row.notes,
            total_amount: row.total_amount,
            payment_status: row.payment_status.parse()?,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

impl DbReview {
    pub fn new(review: NewReview, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            author_id: review.author_id,
            car_id: review.car_id,
            rating: review.rating.as_str().to_string(),
            review_text: review.review_text,
            approved: review.approved,
            created_at: now,
        }
    }
}

impl TryFrom<DbReview> for Review {
    type Error = StoreError;

    fn try_from(row: DbReview) -> Result<Self, Self::Error> {
        Ok(Self {
            id: row.id,
            author: Relation::Reference(row.author_id),
            car_rented: Relation::Reference(row.car_id),
            rating: row.rating.parse()?,
            review_text: row.review_text,
            approved: row.approved,
            created_at: row.created_at,
        })
    }
}

impl DbContactMessage {
    pub fn new(message: NewContactMessage, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            fullname: message.fullname,
            email: message.email,
            message: message.message,
            status: ContactStatus::Pending.as_str().to_string(),
            created_at: now,
        }
    }
}

impl TryFrom<DbContactMessage> for ContactMessage {
    type Error = StoreError;

    fn try_from(row: DbContactMessage) -> Result<Self, Self::Error> {
        Ok(Self {
            id: row.id,
            fullname: row.fullname,
            email: row.email,
            message: row.message,
            status: row.status.parse()?,
            created_at: row.created_at,
        })
    }
}

impl From<OutboxEvent> for DbOutboxEvent {
    fn from(event: OutboxEvent) -> Self {
        Self {
            id: event.id,
            aggregate_id: event.aggregate_id,
            event_type: event.event_type,
            event_data: event.event_data,
            processed: event.processed,
            created_at: event.created_at,
        }
    }
}

impl From<DbOutboxEvent> for OutboxEvent {
    fn from(row: DbOutboxEvent) -> Self {
        Self {
            id: row.id,
            aggregate_id: row.aggregate_id,
            event_type: row.event_type,
            event_data: row.event_data,
            processed: row.processed,
            created_at: row.created_at,
        }
    }
}
