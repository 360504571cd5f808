pub mod cardinality;
pub mod redact;
pub mod verifier;

pub use cardinality::CardinalityGuard;
pub use redact::Redactor;
pub use verifier::{DropReason, Verifier, VerifierConfig};
