use secrecy::SecretString;

use crate::core::errors::Result;
use crate::core::models::key_metadata::KeyAlgorithm;

/// Which key pair to generate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeySpec {
    Rsa { bits: u32 },
    Ec { curve: String },
    Ed25519,
}

impl KeySpec {
    pub fn algorithm(&self) -> KeyAlgorithm {
        match self {
            KeySpec::Rsa { .. } => KeyAlgorithm::Rsa,
            KeySpec::Ec { .. } => KeyAlgorithm::Ec,
            KeySpec::Ed25519 => KeyAlgorithm::Ed25519,
        }
    }
}

/// PEM-encoded halves of a generated key pair.
pub struct GeneratedKeyPair {
    pub public_pem: String,
    /// `PRIVATE KEY`, or `ENCRYPTED PRIVATE KEY` when a passphrase was given.
    pub private_pem: SecretString,
}

/// Port for key pair generation and private-key decryption.
pub trait KeyGenerator: Send + Sync {
    fn generate(&self, spec: &KeySpec, passphrase: Option<&SecretString>)
    -> Result<GeneratedKeyPair>;

    /// Turn a stored private key back into an unencrypted PKCS#8 PEM.
    fn decrypt_private_key(
        &self,
        private_pem: &SecretString,
        passphrase: &SecretString,
    ) -> Result<SecretString>;
}
