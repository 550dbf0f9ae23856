//! EPG source gateway abstractions and implementations

pub mod http;
pub mod traits;

pub use http::HttpEpgGateway;
pub use traits::EpgGateway;
