use crate::error::{logged, BookingError};
use crate::forms::{AdminCarForm, AdminCarPatchForm};
use crate::store::{CarField, Filter, RecordStore, Value};
use bigdecimal::BigDecimal;
use serde::Deserialize;
use shared::{Car, CarCategory, FuelType, Transmission};
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CarSort {
    #[default]
    PriceAsc,
    PriceDesc,
    YearDesc,
    YearAsc,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CarQuery {
    pub transmission: Option<Transmission>,
    pub fuel_type: Option<FuelType>,
    pub category: Option<CarCategory>,
    /// Case-insensitive substring of make or model.
    pub search: Option<String>,
    pub max_price: Option<BigDecimal>,
    pub available_only: Option<bool>,
    pub sort: Option<CarSort>,
}

impl CarQuery {
    pub fn filter(&self) -> Filter<CarField> {
        let mut filter = Filter::All;
        if let Some(transmission) = self.transmission {
            filter = filter.and(Filter::equals(CarField::Transmission, transmission));
        }
        if let Some(fuel_type) = self.fuel_type {
            filter = filter.and(Filter::equals(CarField::FuelType, fuel_type));
        }
        if let Some(category) = self.category {
            filter = filter.and(Filter::equals(CarField::Category, category));
        }
        if let Some(search) = self.search.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
            filter = filter.and(Filter::Or(vec![
                Filter::Like(CarField::Make, search.to_string()),
                Filter::Like(CarField::Model, search.to_string()),
            ]));
        }
        if let Some(max_price) = &self.max_price {
            filter = filter.and(Filter::LessThanEqual(
                CarField::DailyRate,
                Value::Decimal(max_price.clone()),
            ));
        }
        if self.available_only.unwrap_or(false) {
            filter = filter.and(Filter::equals(CarField::Available, true));
        }
        filter
    }
}

fn sort_cars(cars: &mut [Car], sort: CarSort) {
    match sort {
        CarSort::PriceAsc => cars.sort_by(|a, b| a.daily_rate.cmp(&b.daily_rate)),
        CarSort::PriceDesc => cars.sort_by(|a, b| b.daily_rate.cmp(&a.daily_rate)),
        CarSort::YearDesc => cars.sort_by(|a, b| b.year.cmp(&a.year)),
        CarSort::YearAsc => cars.sort_by(|a, b| a.year.cmp(&b.year)),
    }
}

#[derive(Clone)]
pub struct Catalog {
    store: Arc<dyn RecordStore>,
}

impl Catalog {
    pub fn new(store: Arc<dyn RecordStore>) -> Self {
        Self { store }
    }

    pub async fn list_cars(&self, query: &CarQuery) -> Result<Vec<Car>, BookingError> {
        let mut cars = self
            .store
            .find_cars(&query.filter(), None)
            .await
            .map_err(|e| logged("list_cars")(e.into()))?;
        sort_cars(&mut cars, query.sort.unwrap_or_default());
        Ok(cars)
    }

    pub async fn get_car(&self, id: Uuid) -> Result<Car, BookingError> {
        self.store
            .find_car(id)
            .await
            .map_err(|e| logged("get_car")(e.into()))?
            .ok_or(BookingError::NotFound { entity: "car", id })
    }

    pub async fn create_car(&self, form: AdminCarForm) -> Result<Car, BookingError> {
        let car = form.into_new_car()?;
        let car = self
            .store
            .create_car(car)
            .await
            .map_err(|e| logged("create_car")(e.into()))?;
        info!("Added {} {} ({}) to the fleet", car.make, car.model, car.id);
        Ok(car)
    }

    /// Edits a car's details. Availability is not part of a patch.
    pub async fn update_car(
        &self,
        id: Uuid,
        form: AdminCarPatchForm,
    ) -> Result<Car, BookingError> {
        let patch = form.into_patch()?;
        if patch.is_empty() {
            return Err(BookingError::validation("car", "No changes supplied"));
        }
        self.store
            .update_car(id, patch)
            .await
            .map_err(|e| logged("update_car")(e.into()))
    }
}
