// # Heroku Integration
//
// Platform side of certificate issuance:
//
// - [`HerokuPlatform`]: config vars, primary hostname and SNI endpoint
//   upload through the Heroku Platform API
// - [`HttpChallengeProbe`]: plain-HTTP self-test of a published challenge

pub mod platform;
pub mod probe;

pub use platform::{HEROKU_API_BASE, HerokuPlatform};
pub use probe::HttpChallengeProbe;
