pub mod message;
pub mod sink;
