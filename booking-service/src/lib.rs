pub mod accounts;
pub mod api;
pub mod auth;
pub mod catalog;
pub mod config;
pub mod contact;
pub mod error;
pub mod forms;
pub mod lease_machine;
pub mod ledger;
pub mod models;
pub mod orchestrator;
pub mod outbox;
pub mod reconcile;
pub mod reviews;
pub mod schema;
pub mod store;
