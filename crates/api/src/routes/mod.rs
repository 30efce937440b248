pub mod account;
pub mod health;
pub mod listings;
pub mod metrics;
pub mod transactions;
