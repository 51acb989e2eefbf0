use async_trait::async_trait;

#[derive(Debug, thiserror::Error)]
#[error("crypto service error: {0}")]
pub struct CryptoError(pub String);

pub type Result<T> = std::result::Result<T, CryptoError>;

/// Contract for the PII crypto service. Ciphertext is opaque to this system;
/// the `user_binding` ties a ciphertext to its owning user so records cannot
/// be swapped between rows.
#[async_trait]
pub trait CryptoService: Send + Sync {
    async fn encrypt_pii(&self, plain: &str, user_binding: &str) -> Result<Vec<u8>>;
    async fn decrypt_pii(&self, cipher: &[u8], user_binding: &str) -> Result<String>;

    /// Deterministic hash used to look up identities (e.g. email) without
    /// storing them in the clear.
    fn hash_for_lookup(&self, plain: &str) -> String;

    fn hash_password(&self, plain: &str) -> Result<String>;
    fn verify_password(&self, plain: &str, hash: &str) -> Result<bool>;
}
