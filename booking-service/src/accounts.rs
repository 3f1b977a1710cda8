use crate::auth::{hash_password, token_from_headers, verify_password, Session, SessionIssuer};
use crate::error::{logged, BookingError, StoreError};
use crate::forms::{EditProfileForm, SignInForm, SignUpForm};
use crate::store::{CustomerField, Filter, NewCustomer, RecordStore};
use axum::http::HeaderMap;
use shared::{Customer, CustomerPatch};
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

#[derive(Clone)]
pub struct Accounts {
    store: Arc<dyn RecordStore>,
    sessions: SessionIssuer,
    bcrypt_cost: u32,
}

impl Accounts {
    pub fn new(store: Arc<dyn RecordStore>, sessions: SessionIssuer, bcrypt_cost: u32) -> Self {
        Self {
            store,
            sessions,
            bcrypt_cost,
        }
    }

    pub fn sessions(&self) -> &SessionIssuer {
        &self.sessions
    }

    /// Registers a customer and signs them straight in.
    pub async fn sign_up(&self, form: SignUpForm) -> Result<(Customer, Session), BookingError> {
        form.check()?;
        let email = normalize_email(&form.email);
        if self.store.find_credentials(&email).await?.is_some() {
            return Err(BookingError::EmailTaken);
        }

        let password_hash = hash_password(form.password.clone(), self.bcrypt_cost).await?;
        let customer = self
            .store
            .create_customer(NewCustomer {
                email: email.clone(),
                password_hash,
                first_name: form.first_name.trim().to_string(),
                last_name: form.last_name.trim().to_string(),
                phone_number: form
                    .phone_number
                    .map(|p| p.trim().to_string())
                    .filter(|p| !p.is_empty()),
                address: Some(form.address.trim().to_string()),
            })
            .await
            .map_err(|e| match e {
                StoreError::Duplicate(_) => BookingError::EmailTaken,
                other => logged("sign_up")(other.into()),
            })?;
        info!("Customer {} signed up", customer.id);

        self.sign_in(SignInForm {
            email,
            password: form.password,
        })
        .await
    }

    pub async fn sign_in(&self, form: SignInForm) -> Result<(Customer, Session), BookingError> {
        form.check()?;
        let stored = self
            .store
            .find_credentials(&normalize_email(&form.email))
            .await
            .map_err(|e| logged("sign_in")(e.into()))?
            .ok_or(BookingError::UnknownAccount)?;

        if !verify_password(form.password, stored.password_hash).await? {
            return Err(BookingError::InvalidCredentials);
        }
        let session = self.sessions.issue(&stored.customer)?;
        Ok((stored.customer, session))
    }

    /// The customer behind a bearer token or session cookie, if it is still valid.
    pub async fn authenticate(&self, headers: &HeaderMap) -> Result<Option<Customer>, BookingError> {
        let Some(customer_id) = token_from_headers(headers).and_then(|t| self.sessions.verify(&t))
        else {
            return Ok(None);
        };
        self.store
            .find_customer(customer_id)
            .await
            .map_err(|e| logged("authenticate")(e.into()))
    }

    pub async fn require(&self, headers: &HeaderMap) -> Result<Customer, BookingError> {
        self.authenticate(headers)
            .await?
            .ok_or(BookingError::Unauthenticated)
    }

    pub async fn edit_profile(
        &self,
        customer_id: Uuid,
        form: EditProfileForm,
    ) -> Result<Customer, BookingError> {
        let patch = form.into_patch()?;
        let customer = self
            .store
            .update_customer(customer_id, patch)
            .await
            .map_err(|e| logged("edit_profile")(e.into()))?;
        info!("Customer {} edited their profile, approval reset", customer_id);
        Ok(customer)
    }

    pub async fn list_customers(&self, is_valid: Option<bool>) -> Result<Vec<Customer>, BookingError> {
        let filter = match is_valid {
            Some(flag) => Filter::equals(CustomerField::IsValid, flag),
            None => Filter::All,
        };
        self.store
            .find_customers(&filter)
            .await
            .map_err(|e| logged("list_customers")(e.into()))
    }

    pub async fn set_validation(
        &self,
        customer_id: Uuid,
        is_valid: bool,
    ) -> Result<Customer, BookingError> {
        let customer = self
            .store
            .update_customer(
                customer_id,
                CustomerPatch {
                    is_valid: Some(is_valid),
                    ..CustomerPatch::default()
                },
            )
            .await
            .map_err(|e| logged("set_validation")(e.into()))?;
        info!("Customer {} validation set to {}", customer_id, is_valid);
        Ok(customer)
    }
}
