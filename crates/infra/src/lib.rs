//! Infrastructure layer: storage, configuration, and the order/payment
//! orchestrator that ties the domain crates to them.

pub mod config;
pub mod services;
pub mod store;

mod integration_tests;

pub use config::AppConfig;
pub use services::{Orchestrator, ServiceError, ServiceResult};
pub use store::{CommerceStore, InMemoryCommerceStore, PostgresCommerceStore, StoreError};
