use bigdecimal::BigDecimal;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown {kind} value: {value}")]
pub struct UnknownVariant {
    pub kind: &'static str,
    pub value: String,
}

/// Enums persisted as plain strings (varchar columns, query strings, outbox payloads).
macro_rules! string_enum {
    ($name:ident, $kind:literal, { $($variant:ident => $text:literal),+ $(,)? }) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(rename_all = "snake_case")]
        pub enum $name {
            $($variant),+
        }

        impl $name {
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $text),+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = UnknownVariant;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok($name::$variant),)+
                    _ => Err(UnknownVariant { kind: $kind, value: s.to_string() }),
                }
            }
        }
    };
}

string_enum!(CarCategory, "category", {
    Sedan => "sedan",
    Suv => "suv",
    Hatchback => "hatchback",
    Truck => "truck",
    Van => "van",
    Economy => "economy",
});

string_enum!(Transmission, "transmission", {
    Automatic => "automatic",
    Manual => "manual",
});

string_enum!(FuelType, "fuel type", {
    Gasoline => "gasoline",
    Diesel => "diesel",
    Electric => "electric",
    Hybrid => "hybrid",
});

string_enum!(PaymentStatus, "payment status", {
    Pending => "pending",
    Paid => "paid",
    Refunded => "refunded",
    Cancelled => "cancelled",
});

string_enum!(LeaseType, "lease type", {
    Daily => "daily",
    Monthly => "monthly",
});

string_enum!(Rating, "rating", {
    One => "one",
    Two => "two",
    Three => "three",
    Four => "four",
    Five => "five",
});

string_enum!(ContactStatus, "contact status", {
    Pending => "pending",
    Resolved => "resolved",
});

impl PaymentStatus {
    /// Statuses under which a lease keeps its car out of the fleet.
    pub const HOLDING: [PaymentStatus; 2] = [PaymentStatus::Pending, PaymentStatus::Paid];

    pub fn is_terminal(&self) -> bool {
        matches!(self, PaymentStatus::Cancelled | PaymentStatus::Refunded)
    }

    pub fn holds_car(&self) -> bool {
        Self::HOLDING.contains(self)
    }
}

impl Rating {
    pub fn stars(&self) -> u8 {
        match self {
            Rating::One => 1,
            Rating::Two => 2,
            Rating::Three => 3,
            Rating::Four => 4,
            Rating::Five => 5,
        }
    }
}

/// A relationship field that is either just the foreign id or the loaded record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Relation<T> {
    Reference(Uuid),
    Expanded(Box<T>),
}

impl<T: Identified> Relation<T> {
    pub fn id(&self) -> Uuid {
        match self {
            Relation::Reference(id) => *id,
            Relation::Expanded(record) => record.id(),
        }
    }

    pub fn expanded(&self) -> Option<&T> {
        match self {
            Relation::Reference(_) => None,
            Relation::Expanded(record) => Some(record),
        }
    }

    pub fn into_reference(self) -> Self {
        Relation::Reference(self.id())
    }
}

impl<T> From<Uuid> for Relation<T> {
    fn from(id: Uuid) -> Self {
        Relation::Reference(id)
    }
}

pub trait Identified {
    fn id(&self) -> Uuid;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Car {
    pub id: Uuid,
    pub make: String,
    pub model: String,
    pub year: i32,
    pub category: CarCategory,
    pub transmission: Transmission,
    pub fuel_type: FuelType,
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

/// Admin input for a fleet addition. New cars always enter the fleet available.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewCar {
    pub make: String,
    pub model: String,
    pub year: i32,
    pub category: CarCategory,
    pub transmission: Transmission,
    pub fuel_type: FuelType,
    pub seats: i32,
    pub doors: i32,
    pub daily_rate: BigDecimal,
    pub monthly_rate: BigDecimal,
    pub location: Option<String>,
    pub mileage: Option<i32>,
    pub license_plate: Option<String>,
    pub description: Option<String>,
}

/// Admin edit of a car's details. Availability is deliberately absent.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CarPatch {
    pub make: Option<String>,
    pub model: Option<String>,
    pub year: Option<i32>,
    pub category: Option<CarCategory>,
    pub transmission: Option<Transmission>,
    pub fuel_type: Option<FuelType>,
    pub seats: Option<i32>,
    pub doors: Option<i32>,
    pub daily_rate: Option<BigDecimal>,
    pub monthly_rate: Option<BigDecimal>,
    pub location: Option<String>,
    pub mileage: Option<i32>,
    pub license_plate: Option<String>,
    pub description: Option<String>,
}

impl CarPatch {
    pub fn is_empty(&self) -> bool {
        *self == CarPatch::default()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Customer {
    pub id: Uuid,
    pub email: String,
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

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CustomerPatch {
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub id_number: Option<i64>,
    pub phone_number: Option<String>,
    pub address: Option<String>,
    pub license_number: Option<String>,
    pub license_expiry_date: Option<NaiveDate>,
    pub is_valid: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Lease {
    pub id: Uuid,
    pub car: Relation<Car>,
    pub customer: Relation<Customer>,
    pub lease_type: LeaseType,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    pub pickup_location: String,
    pub return_location: String,
    pub notes: Option<String>,
    pub total_amount: BigDecimal,
    pub payment_status: PaymentStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Review {
    pub id: Uuid,
    pub author: Relation<Customer>,
    pub car_rented: Relation<Car>,
    pub rating: Rating,
    pub review_text: String,
    pub approved: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContactMessage {
    pub id: Uuid,
    pub fullname: String,
    pub email: String,
    pub message: String,
    pub status: ContactStatus,
    pub created_at: DateTime<Utc>,
}

impl Identified for Car {
    fn id(&self) -> Uuid {
        self.id
    }
}

impl Identified for Customer {
    fn id(&self) -> Uuid {
        self.id
    }
}

impl Lease {
    pub fn car_id(&self) -> Uuid {
        self.car.id()
    }

    pub fn customer_id(&self) -> Uuid {
        self.customer.id()
    }
}
