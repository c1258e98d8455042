pub mod accelerator;
pub mod collector;
pub mod platform;
pub mod reader;
pub mod snapshot;
pub mod threads;
