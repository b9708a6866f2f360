pub mod audit;
pub mod hardening;
pub mod key_generator;
pub mod key_store;
pub mod passphrase;
pub mod trust_registrar;
pub mod trust_store;
