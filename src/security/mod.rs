//! Security module - Token handling and log redaction
//!
//! - [`Secret`] keeps tokens out of `Debug` output and wipes them on drop
//! - [`redact`] renders tokens, e-mails and URLs safely for logs

mod secret;
pub mod redact;

pub use secret::Secret;
