pub mod file;
pub mod stats;

pub use file::*;
pub use stats::*;
