//! Challenge responders
//!
//! One [`ChallengeResponder`] per challenge type:
//!
//! - [`FileResponder`]: HTTP-01, artifact served from a [`ChallengeSlot`]
//! - [`DnsResponder`]: DNS-01, TXT record managed through a DNS provider
//!
//! [`ChallengeResponder`]: crate::traits::ChallengeResponder

pub mod dns;
pub mod file;

pub use dns::DnsResponder;
pub use file::{CHALLENGE_CONTENT_TYPE, ChallengeResponse, ChallengeSlot, FileResponder};
