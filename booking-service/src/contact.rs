use crate::error::{logged, BookingError};
use crate::forms::ContactForm;
use crate::store::{NewContactMessage, RecordStore};
use shared::{ContactMessage, ContactStatus};
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

#[derive(Clone)]
pub struct ContactDesk {
    store: Arc<dyn RecordStore>,
}

impl ContactDesk {
    pub fn new(store: Arc<dyn RecordStore>) -> Self {
        Self { store }
    }

    pub async fn post(&self, form: ContactForm) -> Result<ContactMessage, BookingError> {
        form.check()?;
        let message = self
            .store
            .create_contact_message(NewContactMessage {
                fullname: form.fullname.trim().to_string(),
                email: form.email.trim().to_string(),
                message: form.message.trim().to_string(),
            })
            .await
            .map_err(|e| logged("post_contact_message")(e.into()))?;
        info!("Contact message {} received", message.id);
        Ok(message)
    }

    pub async fn list(&self) -> Result<Vec<ContactMessage>, BookingError> {
        self.store
            .find_contact_messages()
            .await
            .map_err(|e| logged("list_contact_messages")(e.into()))
    }

    pub async fn resolve(&self, id: Uuid) -> Result<ContactMessage, BookingError> {
        self.store
            .set_contact_status(id, ContactStatus::Resolved)
            .await
            .map_err(|e| logged("resolve_contact_message")(e.into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::InMemoryStore;

    #[tokio::test]
    async fn messages_start_pending_and_resolve() {
        let desk = ContactDesk::new(Arc::new(InMemoryStore::new()));
        let message = desk
            .post(ContactForm {
                fullname: "Otieno Ouma".to_string(),
                email: "otieno@example.com".to_string(),
                message: "Do you deliver cars to Mombasa?".to_string(),
            })
            .await
            .unwrap();
        assert_eq!(message.status, ContactStatus::Pending);

        let resolved = desk.resolve(message.id).await.unwrap();
        assert_eq!(resolved.status, ContactStatus::Resolved);
        assert_eq!(desk.list().await.unwrap(), vec![resolved]);
    }

    #[tokio::test]
    async fn short_messages_are_rejected() {
        let desk = ContactDesk::new(Arc::new(InMemoryStore::new()));
        let err = desk
            .post(ContactForm {
                fullname: "O".to_string(),
                email: "otieno@example.com".to_string(),
                message: "hi".to_string(),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, BookingError::Validation(ref fields) if fields.len() == 2));
    }
}
