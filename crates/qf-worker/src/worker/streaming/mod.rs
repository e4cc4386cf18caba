pub mod processor;
pub mod session;
