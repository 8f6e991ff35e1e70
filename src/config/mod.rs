//! Configuration resolved once at startup from the environment.
//!
//! `.env` is loaded by the binary before anything here runs. Everything is
//! read into immutable structs and passed down explicitly.

mod helpers;
mod secrets;
mod topology;

pub use secrets::TopologySecrets;
pub use topology::{TopologyConfig, default_shared_root};
