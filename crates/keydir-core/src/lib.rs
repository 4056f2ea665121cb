pub mod constants;
pub mod error;
pub mod name;
pub mod types;

pub use constants::*;
pub use error::{Error, ErrorTemplate, Kind, Result};
pub use types::{Endpoint, PublicKey, StoredEntry, Transport, UserName, UserRecord};
