pub mod audit;
pub mod fs_util;
pub mod hardening;
pub mod key_stores;
pub mod keygen;
pub mod passphrase;
pub mod trust_stores;
