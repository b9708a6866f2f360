pub mod audit_entry;
pub mod fingerprint;
pub mod key_metadata;
pub mod snapshot;
pub mod trust_context;
pub mod trust_entry;
pub mod trust_policy;
