pub mod errors;
pub mod memory;
pub mod models;
pub mod postgres;
pub mod store;
