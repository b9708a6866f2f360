use crate::core::errors::Result;
use crate::core::models::fingerprint::Fingerprint;

/// The slice of the trust manager the key manager needs: trusting the
/// fingerprint of a key it just imported.
pub trait TrustRegistrar: Send + Sync {
    fn trust_imported_key(&self, fingerprint: &Fingerprint, key_id: &str) -> Result<()>;
}
