pub mod json_trust_store;
