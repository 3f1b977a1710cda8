use crate::error::{BookingError, FieldError};
use bigdecimal::BigDecimal;
use chrono::{DateTime, Datelike, NaiveDate, Utc};
use num_traits::Zero;
use serde::Deserialize;
use shared::{
    CarCategory, CarPatch, CustomerPatch, FuelType, LeaseType, NewCar, Rating, Transmission,
};
use std::borrow::Cow;
use validator::{Validate, ValidationError, ValidationErrors};

/// Wire names of the validated fields whose Rust name differs from the JSON key.
trait WireNames {
    const RENAMED: &'static [(&'static str, &'static str)];
}

fn wire_name<F: WireNames>(field: &str) -> String {
    F::RENAMED
        .iter()
        .find(|(name, _)| *name == field)
        .map_or(field, |(_, wire)| *wire)
        .to_string()
}

fn field_errors<F: WireNames>(errors: &ValidationErrors) -> Vec<FieldError> {
    let mut fields: Vec<FieldError> = errors
        .field_errors()
        .into_iter()
        .flat_map(|(field, errs)| {
            let field = wire_name::<F>(field);
            errs.iter().map(move |err| {
                let message = err
                    .message
                    .as_ref()
                    .map(|m| m.to_string())
                    .unwrap_or_else(|| format!("Invalid {}", field));
                FieldError::new(field.clone(), message)
            })
        })
        .collect();
    fields.sort_by(|a, b| a.field.cmp(&b.field));
    fields
}

/// Runs derive validation and merges in checks that span fields.
fn check<F>(form: &F, mut extra: Vec<FieldError>) -> Result<(), BookingError>
where
    F: Validate + WireNames,
{
    let mut fields = match form.validate() {
        Ok(()) => Vec::new(),
        Err(errors) => field_errors::<F>(&errors),
    };
    fields.append(&mut extra);
    fields.sort_by(|a, b| a.field.cmp(&b.field));
    if fields.is_empty() {
        Ok(())
    } else {
        Err(BookingError::Validation(fields))
    }
}

/// Accepts RFC 3339 timestamps or bare `YYYY-MM-DD` dates (midnight UTC).
pub fn parse_date(field: &str, raw: &str) -> Result<DateTime<Utc>, FieldError> {
    let raw = raw.trim();
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Ok(ts.with_timezone(&Utc));
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|dt| dt.and_utc())
        .ok_or_else(|| FieldError::new(field, "Invalid date"))
}

#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct SignUpForm {
    #[validate(length(min = 2, message = "First name must be at least 2 characters"))]
    pub first_name: String,
    #[validate(length(min = 2, message = "Last name must be at least 2 characters"))]
    pub last_name: String,
    #[validate(email(message = "Please enter a valid email address"))]
    pub email: String,
    #[validate(length(min = 8, message = "Password must be at least 8 characters"))]
    pub password: String,
    pub confirm_password: String,
    pub phone_number: Option<String>,
    #[validate(length(min = 5, message = "Please enter a valid address"))]
    pub address: String,
}

impl WireNames for SignUpForm {
    const RENAMED: &'static [(&'static str, &'static str)] =
        &[("first_name", "firstName"), ("last_name", "lastName")];
}

impl SignUpForm {
    pub fn check(&self) -> Result<(), BookingError> {
        let mut extra = Vec::new();
        if self.password != self.confirm_password {
            extra.push(FieldError::new("confirmPassword", "Passwords don't match"));
        }
        check(self, extra)
    }
}

#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct SignInForm {
    #[validate(email(message = "Please enter a valid email address"))]
    pub email: String,
    #[validate(length(min = 6, message = "Password must be at least 6 characters"))]
    pub password: String,
}

impl WireNames for SignInForm {
    const RENAMED: &'static [(&'static str, &'static str)] = &[];
}

impl SignInForm {
    pub fn check(&self) -> Result<(), BookingError> {
        check(self, Vec::new())
    }
}

#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CreateLeaseForm {
    #[validate(length(min = 1, message = "Start date is required"))]
    pub start_date: String,
    #[validate(length(min = 1, message = "End date is required"))]
    pub end_date: String,
    pub lease_type: LeaseType,
    #[validate(length(min = 1, message = "Pickup location is required"))]
    pub pickup_location: String,
    #[validate(length(min = 1, message = "Return location is required"))]
    pub return_location: String,
    pub notes: Option<String>,
}

impl WireNames for CreateLeaseForm {
    const RENAMED: &'static [(&'static str, &'static str)] = &[
        ("start_date", "startDate"),
        ("end_date", "endDate"),
        ("pickup_location", "pickupLocation"),
        ("return_location", "returnLocation"),
    ];
}

/// A lease request with its dates parsed and ordered.
#[derive(Debug, Clone, PartialEq)]
pub struct LeaseRequest {
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    pub lease_type: LeaseType,
    pub pickup_location: String,
    pub return_location: String,
    pub notes: Option<String>,
}

impl CreateLeaseForm {
    pub fn parse(&self) -> Result<LeaseRequest, BookingError> {
        let mut extra = Vec::new();
        let start = (!self.start_date.is_empty())
            .then(|| parse_date("startDate", &self.start_date))
            .transpose()
            .unwrap_or_else(|e| {
                extra.push(e);
                None
            });
        let end = (!self.end_date.is_empty())
            .then(|| parse_date("endDate", &self.end_date))
            .transpose()
            .unwrap_or_else(|e| {
                extra.push(e);
                None
            });
        if let (Some(start), Some(end)) = (start, end) {
            if end <= start {
                extra.push(FieldError::new("endDate", "End date must be after start date"));
            }
        }
        check(self, extra)?;

        match (start, end) {
            (Some(start_date), Some(end_date)) => Ok(LeaseRequest {
                start_date,
                end_date,
                lease_type: self.lease_type,
                pickup_location: self.pickup_location.trim().to_string(),
                return_location: self.return_location.trim().to_string(),
                notes: self
                    .notes
                    .as_ref()
                    .map(|n| n.trim().to_string())
                    .filter(|n| !n.is_empty()),
            }),
            _ => Err(BookingError::validation("startDate", "Start date is required")),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct ReviewForm {
    pub rating: Rating,
    #[validate(length(
        min = 10,
        max = 1000,
        message = "Review must be between 10 and 1000 characters"
    ))]
    pub review_text: String,
}

impl WireNames for ReviewForm {
    const RENAMED: &'static [(&'static str, &'static str)] = &[("review_text", "reviewText")];
}

impl ReviewForm {
    pub fn check(&self) -> Result<(), BookingError> {
        check(self, Vec::new())
    }
}

#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct ContactForm {
    #[validate(length(min = 2, message = "Full name must be at least 2 characters"))]
    pub fullname: String,
    #[validate(email(message = "Please enter a valid email address"))]
    pub email: String,
    #[validate(length(min = 10, message = "Message must be at least 10 characters"))]
    pub message: String,
}

impl WireNames for ContactForm {
    const RENAMED: &'static [(&'static str, &'static str)] = &[];
}

impl ContactForm {
    pub fn check(&self) -> Result<(), BookingError> {
        check(self, Vec::new())
    }
}

#[derive(Debug, Clone, Default, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct EditProfileForm {
    #[validate(length(min = 2, message = "First name must be at least 2 characters"))]
    pub first_name: Option<String>,
    #[validate(length(min = 2, message = "Last name must be at least 2 characters"))]
    pub last_name: Option<String>,
    pub phone_number: Option<String>,
    #[validate(length(min = 5, message = "Please enter a valid address"))]
    pub address: Option<String>,
    pub id_number: Option<String>,
    pub license_number: Option<String>,
    pub license_expiry_date: Option<String>,
}

impl WireNames for EditProfileForm {
    const RENAMED: &'static [(&'static str, &'static str)] =
        &[("first_name", "firstName"), ("last_name", "lastName")];
}

fn non_empty(value: &Option<String>) -> Option<String> {
    value
        .as_ref()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

impl EditProfileForm {
    /// Every accepted edit clears the approval flag.
    pub fn into_patch(self) -> Result<CustomerPatch, BookingError> {
        let mut extra = Vec::new();

        let id_number = match non_empty(&self.id_number) {
            None => None,
            Some(raw) => match raw.parse::<i64>() {
                Ok(n) if n > 0 => Some(n),
                _ => {
                    extra.push(FieldError::new("idNumber", "ID number must be numeric"));
                    None
                }
            },
        };
        let license_expiry_date = match non_empty(&self.license_expiry_date) {
            None => None,
            Some(raw) => match NaiveDate::parse_from_str(&raw, "%Y-%m-%d") {
                Ok(date) => Some(date),
                Err(_) => {
                    extra.push(FieldError::new("licenseExpiryDate", "Invalid date"));
                    None
                }
            },
        };
        check(&self, extra)?;

        Ok(CustomerPatch {
            first_name: non_empty(&self.first_name),
            last_name: non_empty(&self.last_name),
            id_number,
            phone_number: non_empty(&self.phone_number),
            address: non_empty(&self.address),
            license_number: non_empty(&self.license_number),
            license_expiry_date,
            is_valid: Some(false),
        })
    }
}

fn not_blank(value: &str) -> Result<(), ValidationError> {
    if value.trim().is_empty() {
        let mut err = ValidationError::new("blank");
        err.message = Some(Cow::from("Must not be blank"));
        return Err(err);
    }
    Ok(())
}

fn non_negative(rate: &BigDecimal) -> Result<(), ValidationError> {
    if *rate < BigDecimal::zero() {
        let mut err = ValidationError::new("negative");
        err.message = Some(Cow::from("Rate must not be negative"));
        return Err(err);
    }
    Ok(())
}

const OLDEST_MODEL_YEAR: i32 = 1950;

fn latest_model_year(year: Option<i32>) -> Vec<FieldError> {
    let latest = Utc::now().year() + 1;
    match year {
        Some(year) if year > latest => vec![FieldError::new(
            "year",
            format!("Year must be between {} and {}", OLDEST_MODEL_YEAR, latest),
        )],
        _ => Vec::new(),
    }
}

/// Admin input for a fleet addition.
#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct AdminCarForm {
    #[validate(custom = "not_blank")]
    pub make: String,
    #[validate(custom = "not_blank")]
    pub model: String,
    #[validate(range(min = 1950, message = "Year must be 1950 or later"))]
    pub year: i32,
    pub category: CarCategory,
    pub transmission: Transmission,
    pub fuel_type: FuelType,
    #[validate(range(min = 1, max = 60, message = "Seats must be between 1 and 60"))]
    pub seats: i32,
    #[validate(range(min = 0, max = 6, message = "Doors must be between 0 and 6"))]
    pub doors: i32,
    #[validate(custom = "non_negative")]
    pub daily_rate: BigDecimal,
    #[validate(custom = "non_negative")]
    pub monthly_rate: BigDecimal,
    pub location: Option<String>,
    pub mileage: Option<i32>,
    pub license_plate: Option<String>,
    pub description: Option<String>,
}

impl WireNames for AdminCarForm {
    const RENAMED: &'static [(&'static str, &'static str)] =
        &[("daily_rate", "dailyRate"), ("monthly_rate", "monthlyRate")];
}

impl AdminCarForm {
    pub fn into_new_car(self) -> Result<NewCar, BookingError> {
        check(&self, latest_model_year(Some(self.year)))?;
        Ok(NewCar {
            make: self.make.trim().to_string(),
            model: self.model.trim().to_string(),
            year: self.year,
            category: self.category,
            transmission: self.transmission,
            fuel_type: self.fuel_type,
            seats: self.seats,
            doors: self.doors,
            daily_rate: self.daily_rate,
            monthly_rate: self.monthly_rate,
            location: non_empty(&self.location),
            mileage: self.mileage,
            license_plate: non_empty(&self.license_plate),
            description: non_empty(&self.description),
        })
    }
}

/// Admin edit of a car's details. Availability is not editable here.
#[derive(Debug, Clone, Default, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct AdminCarPatchForm {
    #[validate(custom = "not_blank")]
    pub make: Option<String>,
    #[validate(custom = "not_blank")]
    pub model: Option<String>,
    #[validate(range(min = 1950, message = "Year must be 1950 or later"))]
    pub year: Option<i32>,
    pub category: Option<CarCategory>,
    pub transmission: Option<Transmission>,
    pub fuel_type: Option<FuelType>,
    #[validate(range(min = 1, max = 60, message = "Seats must be between 1 and 60"))]
    pub seats: Option<i32>,
    #[validate(range(min = 0, max = 6, message = "Doors must be between 0 and 6"))]
    pub doors: Option<i32>,
    #[validate(custom = "non_negative")]
    pub daily_rate: Option<BigDecimal>,
    #[validate(custom = "non_negative")]
    pub monthly_rate: Option<BigDecimal>,
    pub location: Option<String>,
    pub mileage: Option<i32>,
    pub license_plate: Option<String>,
    pub description: Option<String>,
}

impl WireNames for AdminCarPatchForm {
    const RENAMED: &'static [(&'static str, &'static str)] =
        &[("daily_rate", "dailyRate"), ("monthly_rate", "monthlyRate")];
}

impl AdminCarPatchForm {
    pub fn into_patch(self) -> Result<CarPatch, BookingError> {
        check(&self, latest_model_year(self.year))?;
        Ok(CarPatch {
            make: self.make.map(|m| m.trim().to_string()),
            model: self.model.map(|m| m.trim().to_string()),
            year: self.year,
            category: self.category,
            transmission: self.transmission,
            fuel_type: self.fuel_type,
            seats: self.seats,
            doors: self.doors,
            daily_rate: self.daily_rate,
            monthly_rate: self.monthly_rate,
            location: non_empty(&self.location),
            mileage: self.mileage,
            license_plate: non_empty(&self.license_plate),
            description: non_empty(&self.description),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lease_form(start: &str, end: &str) -> CreateLeaseForm {
        CreateLeaseForm {
            start_date: start.to_string(),
            end_date: end.to_string(),
            lease_type: LeaseType::Daily,
            pickup_location: "Kilimani".to_string(),
            return_location: "Kilimani".to_string(),
            notes: Some("  ".to_string()),
        }
    }

    fn fields(err: BookingError) -> Vec<String> {
        match err {
            BookingError::Validation(fields) => fields.into_iter().map(|f| f.field).collect(),
            other => panic!("expected validation error, got {:?}", other),
        }
    }

    #[test]
    fn lease_dates_accept_plain_dates_and_timestamps() {
        let request = lease_form("2024-02-01", "2024-02-03T10:00:00Z").parse().unwrap();
        assert_eq!(request.start_date.to_rfc3339(), "2024-02-01T00:00:00+00:00");
        assert_eq!(request.end_date.to_rfc3339(), "2024-02-03T10:00:00+00:00");
        assert_eq!(request.notes, None);
    }

    #[test]
    fn missing_dates_are_field_errors() {
        let mut form = lease_form("", "");
        form.pickup_location = String::new();
        assert_eq!(
            fields(form.parse().unwrap_err()),
            vec!["endDate", "pickupLocation", "startDate"]
        );
    }

    #[test]
    fn end_must_follow_start() {
        let err = lease_form("2024-02-03", "2024-02-01").parse().unwrap_err();
        assert_eq!(fields(err), vec!["endDate"]);
        let err = lease_form("yesterday", "2024-02-01").parse().unwrap_err();
        assert_eq!(fields(err), vec!["startDate"]);
    }

    #[test]
    fn sign_up_checks_confirmation_and_lengths() {
        let form = SignUpForm {
            first_name: "A".to_string(),
            last_name: "Mwangi".to_string(),
            email: "not-an-email".to_string(),
            password: "password1".to_string(),
            confirm_password: "password2".to_string(),
            phone_number: None,
            address: "Ngong Road".to_string(),
        };
        assert_eq!(
            fields(form.check().unwrap_err()),
            vec!["confirmPassword", "email", "firstName"]
        );
    }

    #[test]
    fn profile_edits_reset_approval() {
        let form = EditProfileForm {
            first_name: Some("Wanjiku".to_string()),
            id_number: Some("12345678".to_string()),
            license_expiry_date: Some("2027-06-30".to_string()),
            ..Default::default()
        };
        let patch = form.into_patch().unwrap();
        assert_eq!(patch.is_valid, Some(false));
        assert_eq!(patch.id_number, Some(12345678));
        assert_eq!(patch.first_name.as_deref(), Some("Wanjiku"));
    }

    #[test]
    fn bad_profile_numbers_are_rejected() {
        let form = EditProfileForm {
            id_number: Some("12ab".to_string()),
            ..Default::default()
        };
        assert_eq!(fields(form.into_patch().unwrap_err()), vec!["idNumber"]);
    }

    #[test]
    fn errors_use_json_field_names() {
        let form = EditProfileForm {
            first_name: Some("W".to_string()),
            last_name: Some("K".to_string()),
            ..Default::default()
        };
        assert_eq!(fields(form.into_patch().unwrap_err()), vec!["firstName", "lastName"]);

        let review = ReviewForm {
            rating: Rating::Four,
            review_text: "ok".to_string(),
        };
        assert_eq!(fields(review.check().unwrap_err()), vec!["reviewText"]);

        let contact = ContactForm {
            fullname: "Zawadi Njeri".to_string(),
            email: "zawadi".to_string(),
            message: "Do you deliver to Mombasa?".to_string(),
        };
        assert_eq!(fields(contact.check().unwrap_err()), vec!["email"]);
    }

    fn admin_car() -> AdminCarForm {
        serde_json::from_value(serde_json::json!({
            "make": " Toyota ",
            "model": "Vitz",
            "year": 2019,
            "category": "hatchback",
            "transmission": "automatic",
            "fuelType": "gasoline",
            "seats": 5,
            "doors": 5,
            "dailyRate": "2200",
            "monthlyRate": "52000",
            "location": "",
            "mileage": 61000,
            "licensePlate": "KDA 123X",
            "description": null
        }))
        .unwrap()
    }

    #[test]
    fn admin_car_form_becomes_a_new_car() {
        let car = admin_car().into_new_car().unwrap();
        assert_eq!(car.make, "Toyota");
        assert_eq!(car.daily_rate, BigDecimal::from(2200));
        assert_eq!(car.location, None);
        assert_eq!(car.license_plate.as_deref(), Some("KDA 123X"));
    }

    #[test]
    fn admin_car_form_reports_every_bad_field() {
        let form = AdminCarForm {
            make: " ".to_string(),
            year: 1900,
            seats: 0,
            doors: 7,
            daily_rate: BigDecimal::from(-5),
            monthly_rate: BigDecimal::from(-125),
            ..admin_car()
        };
        assert_eq!(
            fields(form.into_new_car().unwrap_err()),
            vec!["dailyRate", "doors", "make", "monthlyRate", "seats", "year"]
        );

        let future = AdminCarForm {
            year: Utc::now().year() + 2,
            ..admin_car()
        };
        assert_eq!(fields(future.into_new_car().unwrap_err()), vec!["year"]);
    }

    #[test]
    fn admin_patch_checks_only_supplied_fields() {
        let patch = AdminCarPatchForm {
            mileage: Some(42000),
            ..Default::default()
        }
        .into_patch()
        .unwrap();
        assert_eq!(patch.mileage, Some(42000));
        assert_eq!(patch.daily_rate, None);

        let bad = AdminCarPatchForm {
            model: Some("".to_string()),
            monthly_rate: Some(BigDecimal::from(-1)),
            ..Default::default()
        };
        assert_eq!(fields(bad.into_patch().unwrap_err()), vec!["model", "monthlyRate"]);
    }
}
