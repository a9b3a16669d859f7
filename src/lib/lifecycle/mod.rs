pub mod cycle;
pub mod manager;
pub mod types;
