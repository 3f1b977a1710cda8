use crate::accounts::Accounts;
use crate::auth::{expired_cookie, session_cookie, Session, SessionIssuer};
use crate::catalog::{CarQuery, Catalog};
use crate::contact::ContactDesk;
use crate::error::BookingError;
use crate::forms::{
    AdminCarForm, AdminCarPatchForm, ContactForm, CreateLeaseForm, EditProfileForm, ReviewForm,
    SignInForm, SignUpForm,
};
use crate::ledger::Repair;
use crate::orchestrator::{Actor, BatchCancelReport, BookingOrchestrator, BookingPolicy};
use crate::reviews::{average_rating, ReviewBoard};
use crate::store::RecordStore;
use axum::{
    async_trait,
    extract::{FromRequestParts, Path, Query, State},
    http::{header, request::Parts, HeaderMap, StatusCode},
    response::{IntoResponse, Json},
    routing::{get, patch, post, put},
    Router,
};
use futures::future::try_join_all;
use serde::{Deserialize, Serialize};
use shared::{Car, ContactMessage, Customer, Lease, Review};
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use uuid::Uuid;

pub const ADMIN_KEY_HEADER: &str = "x-admin-key";
pub const IDEMPOTENCY_KEY_HEADER: &str = "idempotency-key";

#[derive(Clone)]
pub struct AppState {
    pub orchestrator: BookingOrchestrator,
    pub catalog: Catalog,
    pub reviews: ReviewBoard,
    pub accounts: Accounts,
    pub contact: ContactDesk,
    pub admin_key: Option<Arc<str>>,
}

impl AppState {
    pub fn new(
        store: Arc<dyn RecordStore>,
        policy: BookingPolicy,
        sessions: SessionIssuer,
        bcrypt_cost: u32,
        admin_key: Option<String>,
    ) -> Self {
        Self {
            orchestrator: BookingOrchestrator::new(store.clone(), policy),
            catalog: Catalog::new(store.clone()),
            reviews: ReviewBoard::new(store.clone()),
            accounts: Accounts::new(store.clone(), sessions, bcrypt_cost),
            contact: ContactDesk::new(store),
            admin_key: admin_key.filter(|key| !key.is_empty()).map(Arc::from),
        }
    }
}

/// The signed-in customer; rejects with 401 otherwise.
pub struct CurrentCustomer(pub Customer);

#[async_trait]
impl FromRequestParts<AppState> for CurrentCustomer {
    type Rejection = BookingError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        state.accounts.require(&parts.headers).await.map(CurrentCustomer)
    }
}

pub struct AdminAccess;

#[async_trait]
impl FromRequestParts<AppState> for AdminAccess {
    type Rejection = BookingError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let Some(expected) = state.admin_key.as_deref() else {
            return Err(BookingError::Forbidden);
        };
        match parts.headers.get(ADMIN_KEY_HEADER).and_then(|v| v.to_str().ok()) {
            Some(key) if key == expected => Ok(AdminAccess),
            Some(_) => Err(BookingError::Forbidden),
            None => Err(BookingError::Unauthenticated),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionResponse {
    pub customer: Customer,
    pub token: String,
    pub expires_at: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CarDetail {
    #[serde(flatten)]
    pub car: Car,
    pub reviews: Vec<Review>,
    pub average_rating: Option<f64>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CarReviews {
    pub reviews: Vec<Review>,
    pub average_rating: Option<f64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CustomerQuery {
    pub is_valid: Option<bool>,
}

#[derive(Debug, Deserialize)]
pub struct ApprovalRequest {
    pub approved: bool,
}

pub fn create_router(state: AppState) -> Router {
    let admin = Router::new()
        .route("/cars", post(admin_create_car))
        .route("/cars/:id", patch(admin_update_car))
        .route("/customers", get(admin_list_customers))
        .route("/customers/:id/approval", post(admin_approve_customer))
        .route("/customers/:id/cancel-pending", post(admin_cancel_pending))
        .route("/leases", get(admin_list_leases))
        .route("/leases/:id/refund", post(admin_refund_lease))
        .route("/leases/:id/cancel", post(admin_cancel_lease))
        .route("/reviews/:id/approval", post(admin_approve_review))
        .route("/contact-us", get(admin_list_contact))
        .route("/contact-us/:id/resolve", post(admin_resolve_contact))
        .route("/reconcile", post(admin_reconcile));

    Router::new()
        .route("/health", get(health_check))
        .route("/auth/sign-up", post(sign_up))
        .route("/auth/sign-in", post(sign_in))
        .route("/auth/sign-out", post(sign_out))
        .route("/auth/me", get(me))
        .route("/profile", put(edit_profile))
        .route("/cars", get(list_cars))
        .route("/cars/:id", get(get_car))
        .route("/cars/:id/reviews", get(car_reviews).post(post_review))
        .route("/cars/:id/leases", post(create_lease))
        .route("/cars/:id/lease", get(car_lease))
        .route("/cars/:id/review", get(my_car_review))
        .route("/leases", get(my_leases))
        .route("/leases/:id", get(get_lease))
        .route("/leases/:id/cancel", post(cancel_lease))
        .route("/leases/:id/pay", post(pay_lease))
        .route("/reviews/home", get(home_reviews))
        .route("/reviews/mine", get(my_reviews))
        .route("/contact-us", post(contact_us))
        .nest("/admin", admin)
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(
            tower_http::cors::CorsLayer::new()
                .allow_origin(tower_http::cors::Any)
                .allow_methods(tower_http::cors::Any)
                .allow_headers(tower_http::cors::Any),
        )
}

pub async fn health_check() -> &'static str {
    "OK"
}

fn with_session(
    status: StatusCode,
    customer: Customer,
    session: Session,
    sessions: &SessionIssuer,
) -> impl IntoResponse {
    let cookie = session_cookie(&session.token, sessions.ttl());
    (
        status,
        [(header::SET_COOKIE, cookie)],
        Json(SessionResponse {
            customer,
            token: session.token,
            expires_at: session.expires_at,
        }),
    )
}

pub async fn sign_up(
    State(state): State<AppState>,
    Json(form): Json<SignUpForm>,
) -> Result<impl IntoResponse, BookingError> {
    let (customer, session) = state.accounts.sign_up(form).await?;
    Ok(with_session(StatusCode::CREATED, customer, session, state.accounts.sessions()))
}

pub async fn sign_in(
    State(state): State<AppState>,
    Json(form): Json<SignInForm>,
) -> Result<impl IntoResponse, BookingError> {
    let (customer, session) = state.accounts.sign_in(form).await?;
    Ok(with_session(StatusCode::OK, customer, session, state.accounts.sessions()))
}

pub async fn sign_out() -> impl IntoResponse {
    (StatusCode::NO_CONTENT, [(header::SET_COOKIE, expired_cookie())])
}

pub async fn me(CurrentCustomer(customer): CurrentCustomer) -> Json<Customer> {
    Json(customer)
}

pub async fn edit_profile(
    State(state): State<AppState>,
    CurrentCustomer(customer): CurrentCustomer,
    Json(form): Json<EditProfileForm>,
) -> Result<Json<Customer>, BookingError> {
    Ok(Json(state.accounts.edit_profile(customer.id, form).await?))
}

pub async fn list_cars(
    State(state): State<AppState>,
    Query(query): Query<CarQuery>,
) -> Result<Json<Vec<Car>>, BookingError> {
    Ok(Json(state.catalog.list_cars(&query).await?))
}

pub async fn get_car(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<CarDetail>, BookingError> {
    let car = state.catalog.get_car(id).await?;
    let reviews = state.reviews.car_reviews(id).await?;
    Ok(Json(CarDetail {
        average_rating: average_rating(&reviews),
        car,
        reviews,
    }))
}

pub async fn car_reviews(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<CarReviews>, BookingError> {
    let reviews = state.reviews.car_reviews(id).await?;
    Ok(Json(CarReviews {
        average_rating: average_rating(&reviews),
        reviews,
    }))
}

pub async fn post_review(
    State(state): State<AppState>,
    CurrentCustomer(customer): CurrentCustomer,
    Path(car_id): Path<Uuid>,
    Json(form): Json<ReviewForm>,
) -> Result<(StatusCode, Json<Review>), BookingError> {
    let review = state.orchestrator.create_review(car_id, &customer, &form).await?;
    Ok((StatusCode::CREATED, Json(review)))
}

pub async fn create_lease(
    State(state): State<AppState>,
    CurrentCustomer(customer): CurrentCustomer,
    Path(car_id): Path<Uuid>,
    headers: HeaderMap,
    Json(form): Json<CreateLeaseForm>,
) -> Result<(StatusCode, Json<Lease>), BookingError> {
    let idempotency_key = headers
        .get(IDEMPOTENCY_KEY_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|key| !key.is_empty());

    let lease = state
        .orchestrator
        .create_lease(car_id, &customer, &form, idempotency_key)
        .await?;
    Ok((StatusCode::CREATED, Json(lease)))
}

pub async fn car_lease(
    State(state): State<AppState>,
    CurrentCustomer(customer): CurrentCustomer,
    Path(car_id): Path<Uuid>,
) -> Result<Json<Option<Lease>>, BookingError> {
    Ok(Json(state.orchestrator.lease_for(car_id, customer.id).await?))
}

async fn expand_all(
    orchestrator: &BookingOrchestrator,
    leases: Vec<Lease>,
) -> Result<Vec<Lease>, BookingError> {
    try_join_all(leases.into_iter().map(|lease| orchestrator.expand(lease))).await
}

pub async fn my_leases(
    State(state): State<AppState>,
    CurrentCustomer(customer): CurrentCustomer,
) -> Result<Json<Vec<Lease>>, BookingError> {
    let leases = state.orchestrator.leases_for_customer(customer.id).await?;
    Ok(Json(expand_all(&state.orchestrator, leases).await?))
}

pub async fn get_lease(
    State(state): State<AppState>,
    CurrentCustomer(customer): CurrentCustomer,
    Path(id): Path<Uuid>,
) -> Result<Json<Lease>, BookingError> {
    let lease = state
        .orchestrator
        .get_lease(id, Actor::Customer(customer.id))
        .await?;
    Ok(Json(state.orchestrator.expand(lease).await?))
}

pub async fn cancel_lease(
    State(state): State<AppState>,
    CurrentCustomer(customer): CurrentCustomer,
    Path(id): Path<Uuid>,
) -> Result<Json<Lease>, BookingError> {
    let lease = state
        .orchestrator
        .cancel_lease(id, Actor::Customer(customer.id))
        .await?;
    Ok(Json(lease))
}

pub async fn pay_lease(
    State(state): State<AppState>,
    CurrentCustomer(customer): CurrentCustomer,
    Path(id): Path<Uuid>,
) -> Result<Json<Lease>, BookingError> {
    let lease = state
        .orchestrator
        .mark_paid(id, Actor::Customer(customer.id))
        .await?;
    Ok(Json(lease))
}

pub async fn home_reviews(State(state): State<AppState>) -> Result<Json<Vec<Review>>, BookingError> {
    Ok(Json(state.reviews.home_reviews().await?))
}

pub async fn my_reviews(
    State(state): State<AppState>,
    CurrentCustomer(customer): CurrentCustomer,
) -> Result<Json<Vec<Review>>, BookingError> {
    Ok(Json(state.reviews.customer_reviews(customer.id).await?))
}

/// The caller's own review of a car, whether or not it has been approved yet.
pub async fn my_car_review(
    State(state): State<AppState>,
    CurrentCustomer(customer): CurrentCustomer,
    Path(car_id): Path<Uuid>,
) -> Result<Json<Option<Review>>, BookingError> {
    Ok(Json(state.reviews.review_for(customer.id, car_id).await?))
}

pub async fn contact_us(
    State(state): State<AppState>,
    Json(form): Json<ContactForm>,
) -> Result<(StatusCode, Json<ContactMessage>), BookingError> {
    Ok((StatusCode::CREATED, Json(state.contact.post(form).await?)))
}

pub async fn admin_create_car(
    State(state): State<AppState>,
    _: AdminAccess,
    Json(form): Json<AdminCarForm>,
) -> Result<(StatusCode, Json<Car>), BookingError> {
    Ok((StatusCode::CREATED, Json(state.catalog.create_car(form).await?)))
}

pub async fn admin_update_car(
    State(state): State<AppState>,
    _: AdminAccess,
    Path(id): Path<Uuid>,
    Json(form): Json<AdminCarPatchForm>,
) -> Result<Json<Car>, BookingError> {
    Ok(Json(state.catalog.update_car(id, form).await?))
}

pub async fn admin_list_customers(
    State(state): State<AppState>,
    _: AdminAccess,
    Query(query): Query<CustomerQuery>,
) -> Result<Json<Vec<Customer>>, BookingError> {
    Ok(Json(state.accounts.list_customers(query.is_valid).await?))
}

pub async fn admin_approve_customer(
    State(state): State<AppState>,
    _: AdminAccess,
    Path(id): Path<Uuid>,
    Json(request): Json<ApprovalRequest>,
) -> Result<Json<Customer>, BookingError> {
    Ok(Json(state.accounts.set_validation(id, request.approved).await?))
}

pub async fn admin_cancel_pending(
    State(state): State<AppState>,
    _: AdminAccess,
    Path(id): Path<Uuid>,
) -> Result<Json<BatchCancelReport>, BookingError> {
    Ok(Json(state.orchestrator.cancel_pending_for_customer(id).await?))
}

pub async fn admin_list_leases(
    State(state): State<AppState>,
    _: AdminAccess,
) -> Result<Json<Vec<Lease>>, BookingError> {
    let leases = state.orchestrator.all_leases().await?;
    Ok(Json(expand_all(&state.orchestrator, leases).await?))
}

pub async fn admin_refund_lease(
    State(state): State<AppState>,
    _: AdminAccess,
    Path(id): Path<Uuid>,
) -> Result<Json<Lease>, BookingError> {
    Ok(Json(state.orchestrator.refund_lease(id).await?))
}

pub async fn admin_cancel_lease(
    State(state): State<AppState>,
    _: AdminAccess,
    Path(id): Path<Uuid>,
) -> Result<Json<Lease>, BookingError> {
    Ok(Json(state.orchestrator.cancel_lease(id, Actor::Admin).await?))
}

pub async fn admin_approve_review(
    State(state): State<AppState>,
    _: AdminAccess,
    Path(id): Path<Uuid>,
    Json(request): Json<ApprovalRequest>,
) -> Result<Json<Review>, BookingError> {
    Ok(Json(state.reviews.set_approval(id, request.approved).await?))
}

pub async fn admin_list_contact(
    State(state): State<AppState>,
    _: AdminAccess,
) -> Result<Json<Vec<ContactMessage>>, BookingError> {
    Ok(Json(state.contact.list().await?))
}

pub async fn admin_resolve_contact(
    State(state): State<AppState>,
    _: AdminAccess,
    Path(id): Path<Uuid>,
) -> Result<Json<ContactMessage>, BookingError> {
    Ok(Json(state.contact.resolve(id).await?))
}

pub async fn admin_reconcile(
    State(state): State<AppState>,
    _: AdminAccess,
) -> Result<Json<Vec<Repair>>, BookingError> {
    Ok(Json(state.orchestrator.ledger().reconcile_all().await?))
}
