//! `recurra-core`: domain foundation building blocks.
//!
//! This crate contains **pure domain** primitives (no infrastructure concerns):
//! identifiers, money, and the domain error model shared by the billing crates.

pub mod entity;
pub mod error;
pub mod id;
pub mod money;

pub use entity::Entity;
pub use error::DomainError;
pub use id::{CustomerId, InvoiceId};
pub use money::{Currency, Money};
