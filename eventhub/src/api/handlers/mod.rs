pub mod events;
pub mod points;
pub mod transactions;
