pub mod results;
pub mod upload;
