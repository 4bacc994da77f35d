#![forbid(unsafe_code)]

mod chain;
mod credentials;
pub mod error;
mod provider;

pub use chain::*;
pub use credentials::*;
pub use provider::*;
