pub mod api;
pub mod campaign;
pub mod config;
pub mod db;
pub mod distributors;
pub mod email;
pub mod engagement;
pub mod error;
pub mod jobs;
pub mod producer;
pub mod subscriptions;
pub mod telemetry;

pub use error::StoreError;
