pub mod key_cache;
pub mod key_manager;
pub mod policy_engine;
pub mod trust_manager;
pub mod trust_scoring;
pub mod trust_search;
pub mod trust_transfer;
