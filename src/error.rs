use super::KeyId;

#[derive(Debug, thiserror::Error, thiserror_ext::Construct)]
#[non_exhaustive]
pub enum Error {
	#[error("secret must be {expected} bytes, instead got {actual}")]
	InvalidSecret { expected: usize, actual: usize },

	#[error("invalid key id: {0:?}")]
	InvalidKeyId(String),

	#[error("key={0} is not available on keyring")]
	UnknownKey(KeyId),

	#[error("keyring doesn't have any keys")]
	EmptyKeyring,

	#[error("ciphertext authentication failed")]
	InvalidAuthentication,

	#[error("failed to decrypt ciphertext")]
	Decryption,

	#[error("failed to encrypt plaintext")]
	Encryption,

	#[error("invalid ciphertext: {0}")]
	InvalidCiphertext(String),

	#[error("secure random number generator failed: {0}")]
	Randomness(String),

	#[error("value serialization failure: {0}")]
	Serialization(#[from] serde_json::Error),

	#[error("unknown algorithm: {0:?}")]
	UnknownAlgorithm(String),

	#[error("{0:?} is not an encrypted field")]
	UnknownField(String),
}
