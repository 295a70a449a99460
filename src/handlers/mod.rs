pub mod file;
pub mod maintenance;
pub mod stats;
