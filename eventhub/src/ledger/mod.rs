//! The three resource ledgers a transaction holds: seats, discount instruments and points.
//!
//! Each ledger borrows one [`UnitOfWork`](crate::db::store::UnitOfWork) for as long as it
//! lives, so every call made through it lands in the caller's atomic scope.

pub mod discounts;
pub mod inventory;
pub mod points;

pub use discounts::Discounts;
pub use inventory::Inventory;
pub use points::Points;
