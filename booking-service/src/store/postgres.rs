use super::*;
use crate::models::*;
use crate::schema::*;
use chrono::Utc;
use diesel::dsl::{exists, sql};
use diesel::pg::Pg;
use diesel::prelude::*;
use diesel::result::{DatabaseErrorKind, Error as DieselError};
use diesel::sql_types::Bool;
use diesel_async::{pooled_connection::bb8::Pool, AsyncConnection, AsyncPgConnection, RunQueryDsl};
use shared::LeaseEvent;
use tracing::info;

pub type DbPool = Pool<AsyncPgConnection>;

type CarPredicate = Box<dyn BoxableExpression<cars::table, Pg, SqlType = Bool>>;
type CustomerPredicate = Box<dyn BoxableExpression<customers::table, Pg, SqlType = Bool>>;
type LeasePredicate = Box<dyn BoxableExpression<leases::table, Pg, SqlType = Bool>>;
type ReviewPredicate = Box<dyn BoxableExpression<reviews::table, Pg, SqlType = Bool>>;

#[derive(Clone)]
pub struct PgStore {
    pool: DbPool,
}

impl PgStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

fn unsupported<F: std::fmt::Debug>(field: F, value: &Value) -> StoreError {
    StoreError::Filter(format!("{:?} cannot be compared with {:?}", field, value))
}

fn text<F: std::fmt::Debug>(field: F, value: &Value) -> Result<String, StoreError> {
    match value {
        Value::Text(s) => Ok(s.clone()),
        other => Err(unsupported(field, other)),
    }
}

fn id<F: std::fmt::Debug>(field: F, value: &Value) -> Result<Uuid, StoreError> {
    match value {
        Value::Id(id) => Ok(*id),
        other => Err(unsupported(field, other)),
    }
}

fn flag<F: std::fmt::Debug>(field: F, value: &Value) -> Result<bool, StoreError> {
    match value {
        Value::Bool(b) => Ok(*b),
        other => Err(unsupported(field, other)),
    }
}

fn decimal<F: std::fmt::Debug>(field: F, value: &Value) -> Result<BigDecimal, StoreError> {
    match value {
        Value::Decimal(d) => Ok(d.clone()),
        Value::Int(i) => Ok(BigDecimal::from(*i)),
        other => Err(unsupported(field, other)),
    }
}

fn int<F: std::fmt::Debug>(field: F, value: &Value) -> Result<i32, StoreError> {
    match value {
        Value::Int(i) => i32::try_from(*i).map_err(|_| unsupported(field, value)),
        other => Err(unsupported(field, other)),
    }
}

fn like_pattern(pattern: &str) -> String {
    let escaped = pattern
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_");
    format!("%{}%", escaped)
}

/// Folds translated parts with `and`/`or`; an empty list is the operator's identity.
macro_rules! combine {
    ($ty:ty, $parts:expr, $translate:ident, $join:ident, $empty:literal) => {{
        let mut parts = $parts.iter();
        match parts.next() {
            None => Box::new(sql::<Bool>($empty)) as $ty,
            Some(first) => {
                let mut acc: $ty = $translate(first)?;
                for part in parts {
                    acc = Box::new(acc.$join($translate(part)?));
                }
                acc
            }
        }
    }};
}

fn car_predicate(filter: &Filter<CarField>) -> Result<CarPredicate, StoreError> {
    let predicate: CarPredicate = match filter {
        Filter::All => Box::new(sql::<Bool>("TRUE")),
        Filter::Equals(field, value) => match field {
            CarField::Make => Box::new(cars::make.eq(text(field, value)?)),
            CarField::Model => Box::new(cars::model.eq(text(field, value)?)),
            CarField::Year => Box::new(cars::year.eq(int(field, value)?)),
            CarField::Category => Box::new(cars::category.eq(text(field, value)?)),
            CarField::Transmission => Box::new(cars::transmission.eq(text(field, value)?)),
            CarField::FuelType => Box::new(cars::fuel_type.eq(text(field, value)?)),
            CarField::DailyRate => Box::new(cars::daily_rate.eq(decimal(field, value)?)),
            CarField::Available => Box::new(cars::available.eq(flag(field, value)?)),
        },
        Filter::LessThanEqual(field, value) => match field {
            CarField::Year => Box::new(cars::year.le(int(field, value)?)),
            CarField::DailyRate => Box::new(cars::daily_rate.le(decimal(field, value)?)),
            other => return Err(unsupported(other, value)),
        },
        Filter::Like(field, pattern) => match field {
            CarField::Make => Box::new(cars::make.ilike(like_pattern(pattern))),
            CarField::Model => Box::new(cars::model.ilike(like_pattern(pattern))),
            other => return Err(unsupported(other, &Value::Text(pattern.clone()))),
        },
        Filter::And(parts) => combine!(CarPredicate, parts, car_predicate, and, "TRUE"),
        Filter::Or(parts) => combine!(CarPredicate, parts, car_predicate, or, "FALSE"),
    };
    Ok(predicate)
}

fn customer_predicate(filter: &Filter<CustomerField>) -> Result<CustomerPredicate, StoreError> {
    let predicate: CustomerPredicate = match filter {
        Filter::All => Box::new(sql::<Bool>("TRUE")),
        Filter::Equals(field, value) => match field {
            CustomerField::Email => Box::new(customers::email.eq(text(field, value)?)),
            CustomerField::IsValid => Box::new(customers::is_valid.eq(flag(field, value)?)),
        },
        Filter::LessThanEqual(field, value) => return Err(unsupported(field, value)),
        Filter::Like(field, pattern) => match field {
            CustomerField::Email => Box::new(customers::email.ilike(like_pattern(pattern))),
            other => return Err(unsupported(other, &Value::Text(pattern.clone()))),
        },
        Filter::And(parts) => {
            combine!(CustomerPredicate, parts, customer_predicate, and, "TRUE")
        }
        Filter::Or(parts) => combine!(CustomerPredicate, parts, customer_predicate, or, "FALSE"),
    };
    Ok(predicate)
}

fn lease_predicate(filter: &Filter<LeaseField>) -> Result<LeasePredicate, StoreError> {
    let predicate: LeasePredicate = match filter {
        Filter::All => Box::new(sql::<Bool>("TRUE")),
        Filter::Equals(field, value) => match field {
            LeaseField::Car => Box::new(leases::car_id.eq(id(field, value)?)),
            LeaseField::Customer => Box::new(leases::customer_id.eq(id(field, value)?)),
            LeaseField::PaymentStatus => {
                Box::new(leases::payment_status.eq(text(field, value)?))
            }
        },
        Filter::LessThanEqual(field, value) => return Err(unsupported(field, value)),
        Filter::Like(field, pattern) => match field {
            LeaseField::PaymentStatus => {
                Box::new(leases::payment_status.ilike(like_pattern(pattern)))
            }
            other => return Err(unsupported(other, &Value::Text(pattern.clone()))),
        },
        Filter::And(parts) => combine!(LeasePredicate, parts, lease_predicate, and, "TRUE"),
        Filter::Or(parts) => combine!(LeasePredicate, parts, lease_predicate, or, "FALSE"),
    };
    Ok(predicate)
}

fn review_predicate(filter: &Filter<ReviewField>) -> Result<ReviewPredicate, StoreError> {
    let predicate: ReviewPredicate = match filter {
        Filter::All => Box::new(sql::<Bool>("TRUE")),
        Filter::Equals(field, value) => match field {
            ReviewField::Author => Box::new(reviews::author_id.eq(id(field, value)?)),
            ReviewField::CarRented => Box::new(reviews::car_id.eq(id(field, value)?)),
            ReviewField::Approved => Box::new(reviews::approved.eq(flag(field, value)?)),
            ReviewField::Rating => Box::new(reviews::rating.eq(text(field, value)?)),
        },
        Filter::LessThanEqual(field, value) => return Err(unsupported(field, value)),
        Filter::Like(field, pattern) => {
            return Err(unsupported(field, &Value::Text(pattern.clone())))
        }
        Filter::And(parts) => combine!(ReviewPredicate, parts, review_predicate, and, "TRUE"),
        Filter::Or(parts) => combine!(ReviewPredicate, parts, review_predicate, or, "FALSE"),
    };
    Ok(predicate)
}

async fn car_exists(conn: &mut AsyncPgConnection, car_id: Uuid) -> Result<bool, StoreError> {
    Ok(diesel::select(exists(cars::table.find(car_id)))
        .get_result::<bool>(conn)
        .await?)
}

async fn lease_exists(conn: &mut AsyncPgConnection, lease_id: Uuid) -> Result<bool, StoreError> {
    Ok(diesel::select(exists(leases::table.find(lease_id)))
        .get_result::<bool>(conn)
        .await?)
}

async fn write_lease(
    conn: &mut AsyncPgConnection,
    write: LeaseWrite,
) -> Result<DbLease, StoreError> {
    let now = Utc::now();
    match write {
        LeaseWrite::Insert(new_lease) => Ok(diesel::insert_into(leases::table)
            .values(DbLease::new(new_lease, now))
            .returning(DbLease::as_returning())
            .get_result(conn)
            .await?),
        LeaseWrite::Transition { lease_id, from, to } => {
            let updated = diesel::update(
                leases::table
                    .find(lease_id)
                    .filter(leases::payment_status.eq(from.as_str())),
            )
            .set((
                leases::payment_status.eq(to.as_str()),
                leases::updated_at.eq(now),
            ))
            .returning(DbLease::as_returning())
            .get_result(conn)
            .await
            .optional()?;

            match updated {
                Some(row) => Ok(row),
                None if lease_exists(conn, lease_id).await? => Err(StoreError::StaleStatus {
                    lease_id,
                    expected: from,
                }),
                None => Err(StoreError::NotFound {
                    collection: "lease",
                    id: lease_id,
                }),
            }
        }
    }
}

async fn write_availability(
    conn: &mut AsyncPgConnection,
    change: AvailabilityChange,
) -> Result<bool, StoreError> {
    let car_id = change.car_id();
    let available = change.resulting_availability();
    let changes = (cars::available.eq(available), cars::updated_at.eq(Utc::now()));

    let changed = match change {
        AvailabilityChange::Claim(_) => {
            diesel::update(cars::table.find(car_id).filter(cars::available.eq(true)))
                .set(changes)
                .execute(conn)
                .await?
        }
        AvailabilityChange::Release(_) => {
            diesel::update(cars::table.find(car_id))
                .set(changes)
                .execute(conn)
                .await?
        }
    };

    if changed == 0 {
        if car_exists(conn, car_id).await? {
            return Err(StoreError::CarClaimed(car_id));
        }
        return Err(StoreError::NotFound {
            collection: "car",
            id: car_id,
        });
    }
    Ok(available)
}

fn unique_conflict(what: String) -> impl FnOnce(DieselError) -> StoreError {
    move |err| match err {
        DieselError::DatabaseError(DatabaseErrorKind::UniqueViolation, _) => {
            StoreError::Duplicate(what)
        }
        other => other.into(),
    }
}

#[async_trait]
impl RecordStore for PgStore {
    async fn find_cars(
        &self,
        filter: &Filter<CarField>,
        limit: Option<i64>,
    ) -> Result<Vec<Car>, StoreError> {
        let predicate = car_predicate(filter)?;
        let mut conn = self.pool.get().await?;

        let mut query = cars::table
            .select(DbCar::as_select())
            .filter(predicate)
            .order(cars::created_at.asc())
            .into_boxed();
        if let Some(limit) = limit {
            query = query.limit(limit);
        }

        query
            .load::<DbCar>(&mut conn)
            .await?
            .into_iter()
            .map(Car::try_from)
            .collect()
    }

    async fn find_car(&self, id: Uuid) -> Result<Option<Car>, StoreError> {
        let mut conn = self.pool.get().await?;
        cars::table
            .find(id)
            .select(DbCar::as_select())
            .first::<DbCar>(&mut conn)
            .await
            .optional()?
            .map(Car::try_from)
            .transpose()
    }

    async fn create_car(&self, car: NewCar) -> Result<Car, StoreError> {
        let mut conn = self.pool.get().await?;
        let car = new_car_record(car, Utc::now());

        diesel::insert_into(cars::table)
            .values(DbCar::from(car.clone()))
            .execute(&mut conn)
            .await?;

        info!("Car {} added to the fleet", car.id);
        Ok(car)
    }

    async fn update_car(&self, id: Uuid, patch: CarPatch) -> Result<Car, StoreError> {
        let mut conn = self.pool.get().await?;
        let row = diesel::update(cars::table.find(id))
            .set(DbCarChanges::from_patch(patch, Utc::now()))
            .returning(DbCar::as_returning())
            .get_result::<DbCar>(&mut conn)
            .await
            .optional()?
            .ok_or(StoreError::NotFound {
                collection: "car",
                id,
            })?;
        Car::try_from(row)
    }

    async fn set_car_availability(
        &self,
        id: Uuid,
        available: bool,
        expected: Option<bool>,
    ) -> Result<bool, StoreError> {
        let mut conn = self.pool.get().await?;
        let changes = (cars::available.eq(available), cars::updated_at.eq(Utc::now()));

        let changed = match expected {
            Some(expected) => {
                diesel::update(cars::table.find(id).filter(cars::available.eq(expected)))
                    .set(changes)
                    .execute(&mut conn)
                    .await?
            }
            None => {
                diesel::update(cars::table.find(id))
                    .set(changes)
                    .execute(&mut conn)
                    .await?
            }
        };

        if changed == 0 && !car_exists(&mut conn, id).await? {
            return Err(StoreError::NotFound {
                collection: "car",
                id,
            });
        }
        Ok(changed > 0)
    }

    async fn find_customers(
        &self,
        filter: &Filter<CustomerField>,
    ) -> Result<Vec<Customer>, StoreError> {
        let predicate = customer_predicate(filter)?;
        let mut conn = self.pool.get().await?;

        let rows = customers::table
            .select(DbCustomer::as_select())
            .filter(predicate)
            .order(customers::created_at.desc())
            .load::<DbCustomer>(&mut conn)
            .await?;
        Ok(rows.into_iter().map(Customer::from).collect())
    }

    async fn find_customer(&self, id: Uuid) -> Result<Option<Customer>, StoreError> {
        let mut conn = self.pool.get().await?;
        let row = customers::table
            .find(id)
            .select(DbCustomer::as_select())
            .first::<DbCustomer>(&mut conn)
            .await
            .optional()?;
        Ok(row.map(Customer::from))
    }

    async fn find_credentials(&self, email: &str) -> Result<Option<StoredCustomer>, StoreError> {
        let mut conn = self.pool.get().await?;
        let row = customers::table
            .filter(customers::email.eq(email))
            .select(DbCustomer::as_select())
            .first::<DbCustomer>(&mut conn)
            .await
            .optional()?;
        Ok(row.map(StoredCustomer::from))
    }

    async fn create_customer(&self, customer: NewCustomer) -> Result<Customer, StoreError> {
        let mut conn = self.pool.get().await?;
        let email = customer.email.clone();

        let row = diesel::insert_into(customers::table)
            .values(DbNewCustomer::new(customer, Utc::now()))
            .returning(DbCustomer::as_returning())
            .get_result::<DbCustomer>(&mut conn)
            .await
            .map_err(unique_conflict(format!("email {}", email)))?;
        Ok(Customer::from(row))
    }

    async fn update_customer(
        &self,
        id: Uuid,
        patch: CustomerPatch,
    ) -> Result<Customer, StoreError> {
        let not_found = StoreError::NotFound {
            collection: "customer",
            id,
        };
        if patch == CustomerPatch::default() {
            return self.find_customer(id).await?.ok_or(not_found);
        }

        let mut conn = self.pool.get().await?;
        let row = diesel::update(customers::table.find(id))
            .set(DbCustomerChanges::from(patch))
            .returning(DbCustomer::as_returning())
            .get_result::<DbCustomer>(&mut conn)
            .await
            .optional()?
            .ok_or(not_found)?;
        Ok(Customer::from(row))
    }

    async fn find_leases(&self, filter: &Filter<LeaseField>) -> Result<Vec<Lease>, StoreError> {
        let predicate = lease_predicate(filter)?;
        let mut conn = self.pool.get().await?;

        leases::table
            .select(DbLease::as_select())
            .filter(predicate)
            .order(leases::created_at.desc())
            .load::<DbLease>(&mut conn)
            .await?
            .into_iter()
            .map(Lease::try_from)
            .collect()
    }

    async fn find_lease(&self, id: Uuid) -> Result<Option<Lease>, StoreError> {
        let mut conn = self.pool.get().await?;
        leases::table
            .find(id)
            .select(DbLease::as_select())
            .first::<DbLease>(&mut conn)
            .await
            .optional()?
            .map(Lease::try_from)
            .transpose()
    }

    async fn commit(&self, commit: LeaseCommit) -> Result<Lease, StoreError> {
        let mut conn = self.pool.get().await?;

        conn.transaction::<_, StoreError, _>(|conn| {
            Box::pin(async move {
                let row = write_lease(conn, commit.write).await?;
                let car_available = match commit.availability {
                    Some(change) => Some(write_availability(conn, change).await?),
                    None => None,
                };
                let lease = Lease::try_from(row)?;

                let event = LeaseEvent::new(commit.event_type, &lease, car_available);
                diesel::insert_into(outbox_events::table)
                    .values(DbOutboxEvent::from(OutboxEvent::from_lease_event(&event)?))
                    .execute(conn)
                    .await?;

                if let Some(key) = commit.idempotency_key {
                    let conflict = unique_conflict(format!("idempotency key {}", key));
                    diesel::insert_into(processed_commands::table)
                        .values(ProcessedCommand {
                            idempotency_key: key,
                            lease_id: lease.id,
                            processed_at: Utc::now(),
                        })
                        .execute(conn)
                        .await
                        .map_err(conflict)?;
                }

                Ok(lease)
            })
        })
        .await
    }

    async fn find_processed_command(
        &self,
        idempotency_key: &str,
    ) -> Result<Option<Uuid>, StoreError> {
        let mut conn = self.pool.get().await?;
        Ok(processed_commands::table
            .find(idempotency_key)
            .select(processed_commands::lease_id)
            .first::<Uuid>(&mut conn)
            .await
            .optional()?)
    }

    async fn find_reviews(
        &self,
        filter: &Filter<ReviewField>,
        limit: Option<i64>,
    ) -> Result<Vec<Review>, StoreError> {
        let predicate = review_predicate(filter)?;
        let mut conn = self.pool.get().await?;

        let mut query = reviews::table
            .select(DbReview::as_select())
            .filter(predicate)
            .order(reviews::created_at.desc())
            .into_boxed();
        if let Some(limit) = limit {
            query = query.limit(limit);
        }

        query
            .load::<DbReview>(&mut conn)
            .await?
            .into_iter()
            .map(Review::try_from)
            .collect()
    }

    async fn create_review(&self, review: NewReview) -> Result<Review, StoreError> {
        let mut conn = self.pool.get().await?;
        let row = diesel::insert_into(reviews::table)
            .values(DbReview::new(review, Utc::now()))
            .returning(DbReview::as_returning())
            .get_result::<DbReview>(&mut conn)
            .await?;
        Review::try_from(row)
    }

    async fn set_review_approval(&self, id: Uuid, approved: bool) -> Result<Review, StoreError> {
        let mut conn = self.pool.get().await?;
        let row = diesel::update(reviews::table.find(id))
            .set(reviews::approved.eq(approved))
            .returning(DbReview::as_returning())
            .get_result::<DbReview>(&mut conn)
            .await
            .optional()?
            .ok_or(StoreError::NotFound {
                collection: "review",
                id,
            })?;
        Review::try_from(row)
    }

    async fn create_contact_message(
        &self,
        message: NewContactMessage,
    ) -> Result<ContactMessage, StoreError> {
        let mut conn = self.pool.get().await?;
        let row = diesel::insert_into(contact_messages::table)
            .values(DbContactMessage::new(message, Utc::now()))
            .returning(DbContactMessage::as_returning())
            .get_result::<DbContactMessage>(&mut conn)
            .await?;
        ContactMessage::try_from(row)
    }

    async fn find_contact_messages(&self) -> Result<Vec<ContactMessage>, StoreError> {
        let mut conn = self.pool.get().await?;
        contact_messages::table
            .select(DbContactMessage::as_select())
            .order(contact_messages::created_at.desc())
            .load::<DbContactMessage>(&mut conn)
            .await?
            .into_iter()
            .map(ContactMessage::try_from)
            .collect()
    }

    async fn set_contact_status(
        &self,
        id: Uuid,
        status: ContactStatus,
    ) -> Result<ContactMessage, StoreError> {
        let mut conn = self.pool.get().await?;
        let row = diesel::update(contact_messages::table.find(id))
            .set(contact_messages::status.eq(status.as_str()))
            .returning(DbContactMessage::as_returning())
            .get_result::<DbContactMessage>(&mut conn)
            .await
            .optional()?
            .ok_or(StoreError::NotFound {
                collection: "contact message",
                id,
            })?;
        ContactMessage::try_from(row)
    }

    async fn pending_outbox_events(&self, limit: i64) -> Result<Vec<OutboxEvent>, StoreError> {
        let mut conn = self.pool.get().await?;
        let rows = outbox_events::table
            .filter(outbox_events::processed.eq(false))
            .order(outbox_events::created_at.asc())
            .limit(limit)
            .select(DbOutboxEvent::as_select())
            .load::<DbOutboxEvent>(&mut conn)
            .await?;
        Ok(rows.into_iter().map(OutboxEvent::from).collect())
    }

    async fn mark_outbox_processed(&self, id: Uuid) -> Result<(), StoreError> {
        let mut conn = self.pool.get().await?;
        let updated = diesel::update(outbox_events::table.find(id))
            .set(outbox_events::processed.eq(true))
            .execute(&mut conn)
            .await?;
        if updated == 0 {
            return Err(StoreError::NotFound {
                collection: "outbox event",
                id,
            });
        }
        Ok(())
    }
}
