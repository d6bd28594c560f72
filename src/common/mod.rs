pub mod errors;
pub mod http;
pub mod logger;
pub mod retry;
pub mod text;
pub mod types;

pub use errors::*;
pub use http::*;
pub use types::*;
