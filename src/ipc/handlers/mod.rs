pub mod core;
pub mod migration;
pub mod records;
pub mod registration;
pub mod sessions;
