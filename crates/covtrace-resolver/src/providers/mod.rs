//! DID method providers

pub mod http;
pub mod memory;

pub use http::HttpResolver;
pub use memory::MemoryResolver;
