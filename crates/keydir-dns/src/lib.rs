pub mod ownership;
pub mod resolver;

pub use ownership::{verify_owner, TXT_PROOF_PREFIX};
pub use resolver::{SystemResolver, TxtResolver};
