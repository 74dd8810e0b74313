//! Network representation and validation.
//!
//! A [`Network`] owns the device calculators and the coupled-inductor
//! groups of one simulation. Terminals are plain indices into the potential
//! vector; index [`GROUND`] is the reference node.

mod network;
mod types;
mod validate;

pub use network::Network;
pub use types::*;
pub use validate::validate_network;
