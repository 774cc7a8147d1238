//! Mainsail signing core.
//!
//! Signing produces `.edbdl` bundles carrying an Ed25519 signature and the
//! signer's public key. Review checks the signature, asks the profile
//! mirrors who owns the key, and compares the answer with the local trust
//! store. Key storage and folder layout are driven by a primary/backup pair
//! of configuration records that [`config::ConfigStore`] keeps converged.

pub mod bundle;
pub mod config;
pub mod error;
mod fsutil;
pub mod mirror;
pub mod paths;
pub mod profile;
pub mod review;
pub mod secret;
pub mod signing;
pub mod trust;

pub use error::{Error, Result};
