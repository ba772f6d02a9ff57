pub mod logger;
pub mod signal;
