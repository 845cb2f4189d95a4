//! Electronic tax document (DTE) lifecycle, invalidation and VAT ledger service.

pub mod config;
pub mod dtos;
pub mod error;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod services;
pub mod startup;

pub use error::{DteError, RepositoryError, ValidationCode};
pub use startup::{AppState, Application};
