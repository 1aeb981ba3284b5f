pub mod config;
pub mod errors;
pub mod job;
pub mod learning_rate;

pub use config::*;
pub use errors::*;
pub use job::*;
pub use learning_rate::*;
