pub mod enrich;
pub mod file;
pub mod setup;
pub mod worker;
