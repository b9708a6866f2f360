//! Key and trust management: asymmetric key pairs with rotation and
//! archival, an LRU cache for key material, and a trust store of
//! public-key fingerprints governed by prioritized policies.

pub mod adapters;
pub mod config;
pub mod core;
