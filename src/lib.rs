//! # HealthHub Library
//!
//! Multi-tenant hospital management: the access policy engine, the cached
//! entity repository, entity services and the HTTP surface on top of them.

pub mod access;
pub mod auth;
pub mod cache;
pub mod config;
pub mod db;
pub mod error;
pub mod handlers;
pub mod models;
pub mod passwords;
pub mod repositories;
pub mod server;
pub mod services;
pub mod store;
pub mod telemetry;
pub mod tenancy;
pub use migration;
