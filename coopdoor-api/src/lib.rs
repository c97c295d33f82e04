pub mod client;
pub mod error;
pub mod models;
pub mod pulse;
pub mod transport;

pub use error::{ErrorBody, ErrorKind};
pub use models::*;
