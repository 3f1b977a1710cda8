diesel::table! {
    cars (id) {
        id -> Uuid,
        make -> Varchar,
        model -> Varchar,
        year -> Int4,
        category -> Varchar,
        transmission -> Varchar,
        fuel_type -> Varchar,
        seats -> Int4,
        doors -> Int4,
        daily_rate -> Numeric,
        monthly_rate -> Numeric,
        available -> Bool,
        location -> Nullable<Varchar>,
        mileage -> Nullable<Int4>,
        license_plate -> Nullable<Varchar>,
        description -> Nullable<Text>,
        created_at -> Timestamptz,
        updated_at -> Timestamptz,
    }
}

diesel::table! {
    customers (id) {
        id -> Uuid,
        email -> Varchar,
        password_hash -> Varchar,
        first_name -> Varchar,
        last_name -> Varchar,
        id_number -> Nullable<Int8>,
        phone_number -> Nullable<Varchar>,
        address -> Nullable<Varchar>,
        license_number -> Nullable<Varchar>,
        license_expiry_date -> Nullable<Date>,
        is_valid -> Bool,
        created_at -> Timestamptz,
    }
}

diesel::table! {
    leases (id) {
        id -> Uuid,
        car_id -> Uuid,
        customer_id -> Uuid,
        lease_type -> Varchar,
        start_date -> Timestamptz,
        end_date -> Timestamptz,
        pickup_location -> Varchar,
        return_location -> Varchar,
        notes -> Nullable<Text>,
        total_amount -> Numeric,
        payment_status -> Varchar,
        created_at -> Timestamptz,
        updated_at -> Timestamptz,
    }
}

diesel::table! {
    reviews (id) {
        id -> Uuid,
        author_id -> Uuid,
        car_id -> Uuid,
        rating -> Varchar,
        review_text -> Text,
        approved -> Bool,
        created_at -> Timestamptz,
    }
}

diesel::table! {
    contact_messages (id) {
        id -> Uuid,
        fullname -> Varchar,
        email -> Varchar,
        message -> Text,
        status -> Varchar,
        created_at -> Timestamptz,
    }
}

diesel::table! {
    outbox_events (id) {
        id -> Uuid,
        aggregate_id -> Uuid,
        event_type -> Varchar,
        event_data -> Jsonb,
        processed -> Bool,
        created_at -> Timestamptz,
    }
}

diesel::table! {
    processed_commands (idempotency_key) {
        idempotency_key -> Varchar,
        lease_id -> Uuid,
        processed_at -> Timestamptz,
    }
}

diesel::joinable!(leases -> cars (car_id));
diesel::joinable!(leases -> customers (customer_id));
diesel::joinable!(reviews -> cars (car_id));
diesel::joinable!(reviews -> customers (author_id));
diesel::joinable!(processed_commands -> leases (lease_id));

diesel::allow_tables_to_appear_in_same_query!(
    cars,
    customers,
    leases,
    reviews,
    contact_messages,
    outbox_events,
    processed_commands,
);
