pub mod ask;
pub mod config;

pub use ask::*;
pub use config::*;
