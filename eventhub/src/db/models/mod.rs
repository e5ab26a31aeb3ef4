pub mod catalog;
pub mod discounts;
pub mod notifications;
pub mod points;
pub mod transactions;
