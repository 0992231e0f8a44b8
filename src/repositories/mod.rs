//! # Repository Layer
//!
//! The cached entity repository: policy-checked, cache-first access to every
//! entity collection on top of the document store and cache adapters.

pub mod entity;

pub use entity::EntityRepository;
