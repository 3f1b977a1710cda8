use bigdecimal::BigDecimal;
use booking_service::accounts::Accounts;
use booking_service::auth::SessionIssuer;
use booking_service::error::{BookingError, ErrorKind};
use booking_service::forms::{CreateLeaseForm, SignInForm, SignUpForm};
use booking_service::orchestrator::{Actor, BookingOrchestrator, BookingPolicy};
use booking_service::outbox::{LogPublisher, OutboxProcessor};
use booking_service::store::memory::InMemoryStore;
use booking_service::store::{NewCustomer, RecordStore};
use shared::{CarCategory, Customer, FuelType, LeaseType, NewCar, PaymentStatus, Transmission};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

fn fleet_car(make: &str, model: &str) -> NewCar {
    NewCar {
        make: make.to_string(),
        model: model.to_string(),
        year: 2021,
        category: CarCategory::Sedan,
        transmission: Transmission::Automatic,
        fuel_type: FuelType::Gasoline,
        seats: 5,
        doors: 4,
        daily_rate: BigDecimal::from(1000),
        monthly_rate: BigDecimal::from(25000),
        location: Some("Nairobi".to_string()),
        mileage: Some(42000),
        license_plate: None,
        description: None,
    }
}

async fn customer(store: &InMemoryStore, email: &str) -> Customer {
    store
        .create_customer(NewCustomer {
            email: email.to_string(),
            password_hash: "hash".to_string(),
            first_name: "Wanjiru".to_string(),
            last_name: "Kariuki".to_string(),
            phone_number: None,
            address: None,
        })
        .await
        .unwrap()
}

fn lease_form(start: &str, end: &str) -> CreateLeaseForm {
    CreateLeaseForm {
        start_date: start.to_string(),
        end_date: end.to_string(),
        lease_type: LeaseType::Daily,
        pickup_location: "Westlands".to_string(),
        return_location: "Westlands".to_string(),
        notes: None,
    }
}

async fn available(store: &InMemoryStore, car_id: Uuid) -> bool {
    store.find_car(car_id).await.unwrap().unwrap().available
}

#[tokio::test]
async fn sign_up_book_and_cancel() {
    let store = Arc::new(InMemoryStore::new());
    let car = store.create_car(fleet_car("Toyota", "Axio")).await.unwrap();
    let accounts = Accounts::new(
        store.clone(),
        SessionIssuer::new("integration-secret", chrono::Duration::days(7)),
        4,
    );
    let orchestrator = BookingOrchestrator::new(store.clone(), BookingPolicy::default());

    accounts
        .sign_up(SignUpForm {
            first_name: "Amani".to_string(),
            last_name: "Njoroge".to_string(),
            email: "a@b.com".to_string(),
            password: "abcdefgh".to_string(),
            confirm_password: "abcdefgh".to_string(),
            phone_number: None,
            address: "Kilimani".to_string(),
        })
        .await
        .unwrap();
    let (customer, _session) = accounts
        .sign_in(SignInForm {
            email: "a@b.com".to_string(),
            password: "abcdefgh".to_string(),
        })
        .await
        .unwrap();

    let lease = orchestrator
        .create_lease(car.id, &customer, &lease_form("2024-02-01", "2024-02-03"), None)
        .await
        .unwrap();
    assert_eq!(lease.payment_status, PaymentStatus::Pending);
    assert_eq!(lease.total_amount, BigDecimal::from(2000));
    assert!(!available(&store, car.id).await);

    let cancelled = orchestrator
        .cancel_lease(lease.id, Actor::Customer(customer.id))
        .await
        .unwrap();
    assert_eq!(cancelled.payment_status, PaymentStatus::Cancelled);
    assert!(available(&store, car.id).await);
}

#[tokio::test]
async fn cancelled_leases_cannot_be_cancelled_again_or_paid() {
    let store = Arc::new(InMemoryStore::new());
    let car = store.create_car(fleet_car("Mazda", "Demio")).await.unwrap();
    let customer = customer(&store, "c@d.com").await;
    let orchestrator = BookingOrchestrator::new(store.clone(), BookingPolicy::default());

    let lease = orchestrator
        .create_lease(car.id, &customer, &lease_form("2024-01-01", "2024-01-05"), None)
        .await
        .unwrap();
    orchestrator.cancel_lease(lease.id, Actor::Admin).await.unwrap();

    // Someone else books the car in between; a stray second cancel must not free it.
    let other = self::customer(&store, "e@f.com").await;
    orchestrator
        .create_lease(car.id, &other, &lease_form("2024-03-01", "2024-03-02"), None)
        .await
        .unwrap();

    let again = orchestrator.cancel_lease(lease.id, Actor::Admin).await.unwrap_err();
    assert_eq!(again.kind(), ErrorKind::BusinessRule);
    assert!(!available(&store, car.id).await);

    let paid = orchestrator
        .mark_paid(lease.id, Actor::Customer(customer.id))
        .await
        .unwrap_err();
    assert!(matches!(paid, BookingError::InvalidTransition { .. }));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_bookings_of_one_car_admit_exactly_one() {
    let store = Arc::new(InMemoryStore::new());
    let car_id = store.create_car(fleet_car("Nissan", "Note")).await.unwrap().id;
    let orchestrator = BookingOrchestrator::new(store.clone(), BookingPolicy::default());

    let mut handles = Vec::new();
    for i in 0..8 {
        let orchestrator = orchestrator.clone();
        let customer = customer(&store, &format!("racer{}@example.com", i)).await;
        handles.push(tokio::spawn(async move {
            orchestrator
                .create_lease(car_id, &customer, &lease_form("2024-05-01", "2024-05-04"), None)
                .await
        }));
    }

    let mut admitted = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => admitted += 1,
            Err(err) => assert!(matches!(err, BookingError::CarUnavailable(id) if id == car_id)),
        }
    }

    assert_eq!(admitted, 1);
    assert!(!available(&store, car_id).await);
}

#[tokio::test]
async fn pricing_is_deterministic() {
    let store = Arc::new(InMemoryStore::new());
    let orchestrator = BookingOrchestrator::new(store.clone(), BookingPolicy::default());
    let customer = customer(&store, "g@h.com").await;

    for _ in 0..2 {
        let car = store.create_car(fleet_car("Suzuki", "Swift")).await.unwrap();
        let lease = orchestrator
            .create_lease(car.id, &customer, &lease_form("2024-01-01", "2024-01-05"), None)
            .await
            .unwrap();
        assert_eq!(lease.total_amount, BigDecimal::from(4000));
    }
}

#[tokio::test]
async fn reconcile_repairs_drift_left_by_a_crash() {
    let store = Arc::new(InMemoryStore::new());
    let held = store.create_car(fleet_car("Ford", "Ranger")).await.unwrap();
    let idle = store.create_car(fleet_car("Ford", "Fiesta")).await.unwrap();
    let customer = customer(&store, "i@j.com").await;
    let orchestrator = BookingOrchestrator::new(store.clone(), BookingPolicy::default());
    orchestrator
        .create_lease(held.id, &customer, &lease_form("2024-01-01", "2024-01-02"), None)
        .await
        .unwrap();

    store.force_availability(held.id, true).await;
    store.force_availability(idle.id, false).await;

    let mut repairs = orchestrator.ledger().reconcile_all().await.unwrap();
    repairs.sort_by_key(|r| r.available);
    assert_eq!(repairs.len(), 2);
    assert_eq!((repairs[0].car_id, repairs[0].available), (held.id, false));
    assert_eq!((repairs[1].car_id, repairs[1].available), (idle.id, true));
    assert!(!available(&store, held.id).await);
    assert!(available(&store, idle.id).await);
}

#[tokio::test]
async fn every_transition_lands_in_the_outbox() {
    let store = Arc::new(InMemoryStore::new());
    let car = store.create_car(fleet_car("VW", "Polo")).await.unwrap();
    let customer = customer(&store, "k@l.com").await;
    let orchestrator = BookingOrchestrator::new(store.clone(), BookingPolicy::default());

    let lease = orchestrator
        .create_lease(car.id, &customer, &lease_form("2024-01-01", "2024-01-03"), None)
        .await
        .unwrap();
    orchestrator
        .mark_paid(lease.id, Actor::Customer(customer.id))
        .await
        .unwrap();
    orchestrator.refund_lease(lease.id).await.unwrap();
    assert_eq!(store.outbox_len().await, 3);
    assert!(available(&store, car.id).await);

    let processor = OutboxProcessor::new(store.clone(), Arc::new(LogPublisher), Duration::from_secs(5));
    assert_eq!(processor.process_outbox_events().await.unwrap(), 3);
    assert!(store.pending_outbox_events(100).await.unwrap().is_empty());
}

#[tokio::test]
async fn failed_commits_leave_no_trace() {
    let store = Arc::new(InMemoryStore::new());
    let car = store.create_car(fleet_car("Kia", "Picanto")).await.unwrap();
    let customer = customer(&store, "m@n.com").await;
    let orchestrator = BookingOrchestrator::new(store.clone(), BookingPolicy::default());

    store.fail_writes(true);
    let err = orchestrator
        .create_lease(car.id, &customer, &lease_form("2024-01-01", "2024-01-03"), None)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Persistence);

    store.fail_writes(false);
    assert!(available(&store, car.id).await);
    assert_eq!(store.outbox_len().await, 0);
    assert!(orchestrator.leases_for_customer(customer.id).await.unwrap().is_empty());
}
