use crate::error::{logged, BookingError};
use crate::store::{Filter, RecordStore, ReviewField};
use shared::Review;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

const HOME_REVIEWS: i64 = 3;

/// Mean star rating, or `None` when there is nothing to average.
pub fn average_rating(reviews: &[Review]) -> Option<f64> {
    if reviews.is_empty() {
        return None;
    }
    let total: u32 = reviews.iter().map(|r| u32::from(r.rating.stars())).sum();
    Some(f64::from(total) / reviews.len() as f64)
}

fn approved() -> Filter<ReviewField> {
    Filter::equals(ReviewField::Approved, true)
}

#[derive(Clone)]
pub struct ReviewBoard {
    store: Arc<dyn RecordStore>,
}

impl ReviewBoard {
    pub fn new(store: Arc<dyn RecordStore>) -> Self {
        Self { store }
    }

    async fn find(
        &self,
        operation: &'static str,
        filter: Filter<ReviewField>,
        limit: Option<i64>,
    ) -> Result<Vec<Review>, BookingError> {
        self.store
            .find_reviews(&filter, limit)
            .await
            .map_err(|e| logged(operation)(e.into()))
    }

    pub async fn home_reviews(&self) -> Result<Vec<Review>, BookingError> {
        self.find("home_reviews", approved(), Some(HOME_REVIEWS)).await
    }

    pub async fn car_reviews(&self, car_id: Uuid) -> Result<Vec<Review>, BookingError> {
        let filter = approved().and(Filter::equals(ReviewField::CarRented, car_id));
        self.find("car_reviews", filter, None).await
    }

    pub async fn customer_reviews(&self, customer_id: Uuid) -> Result<Vec<Review>, BookingError> {
        let filter = approved().and(Filter::equals(ReviewField::Author, customer_id));
        self.find("customer_reviews", filter, None).await
    }

    /// A customer's review of a car, approved or not.
    pub async fn review_for(
        &self,
        customer_id: Uuid,
        car_id: Uuid,
    ) -> Result<Option<Review>, BookingError> {
        let filter = Filter::equals(ReviewField::Author, customer_id)
            .and(Filter::equals(ReviewField::CarRented, car_id));
        Ok(self.find("review_for", filter, Some(1)).await?.into_iter().next())
    }

    pub async fn set_approval(&self, review_id: Uuid, approved: bool) -> Result<Review, BookingError> {
        let review = self
            .store
            .set_review_approval(review_id, approved)
            .await
            .map_err(|e| logged("set_review_approval")(e.into()))?;
        info!("Review {} approval set to {}", review_id, approved);
        Ok(review)
    }
}
