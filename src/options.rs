use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::{AesCbc, AesGcm, DigestAlgorithm, Digester, Encryptor, Error};

/// The envelope formats that come in the box.
///
/// Each has a stable name (as used by [`FromStr`](std::str::FromStr),
/// [`Display`](std::fmt::Display) and serde), which is also what the corresponding
/// [`Encryptor::name`] returns.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Algorithm {
	#[default]
	#[serde(rename = "aes-128-cbc")]
	Aes128Cbc,
	#[serde(rename = "aes-192-cbc")]
	Aes192Cbc,
	#[serde(rename = "aes-256-cbc")]
	Aes256Cbc,
	#[serde(rename = "aes-128-cbc-unauthenticated")]
	Aes128CbcUnauthenticated,
	#[serde(rename = "aes-192-cbc-unauthenticated")]
	Aes192CbcUnauthenticated,
	#[serde(rename = "aes-256-cbc-unauthenticated")]
	Aes256CbcUnauthenticated,
	#[serde(rename = "aes-256-gcm")]
	Aes256Gcm,
}

impl Algorithm {
	pub const ALL: [Algorithm; 7] = [
		Self::Aes128Cbc,
		Self::Aes192Cbc,
		Self::Aes256Cbc,
		Self::Aes128CbcUnauthenticated,
		Self::Aes192CbcUnauthenticated,
		Self::Aes256CbcUnauthenticated,
		Self::Aes256Gcm,
	];

	/// Build the [`Encryptor`] for this algorithm.
	pub fn encryptor(self) -> Arc<dyn Encryptor> {
		match self {
			Self::Aes128Cbc => Arc::new(AesCbc::aes128()),
			Self::Aes192Cbc => Arc::new(AesCbc::aes192()),
			Self::Aes256Cbc => Arc::new(AesCbc::aes256()),
			Self::Aes128CbcUnauthenticated => Arc::new(AesCbc::aes128().unauthenticated()),
			Self::Aes192CbcUnauthenticated => Arc::new(AesCbc::aes192().unauthenticated()),
			Self::Aes256CbcUnauthenticated => Arc::new(AesCbc::aes256().unauthenticated()),
			Self::Aes256Gcm => Arc::new(AesGcm),
		}
	}

	pub fn name(self) -> &'static str {
		match self {
			Self::Aes128Cbc => "aes-128-cbc",
			Self::Aes192Cbc => "aes-192-cbc",
			Self::Aes256Cbc => "aes-256-cbc",
			Self::Aes128CbcUnauthenticated => "aes-128-cbc-unauthenticated",
			Self::Aes192CbcUnauthenticated => "aes-192-cbc-unauthenticated",
			Self::Aes256CbcUnauthenticated => "aes-256-cbc-unauthenticated",
			Self::Aes256Gcm => "aes-256-gcm",
		}
	}
}

impl std::fmt::Display for Algorithm {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.write_str(self.name())
	}
}

impl std::str::FromStr for Algorithm {
	type Err = Error;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		Self::ALL
			.into_iter()
			.find(|a| a.name() == s)
			.ok_or_else(|| Error::unknown_algorithm(s))
	}
}

/// How a [`Keyring`](super::Keyring) should encrypt and digest.
///
/// This is deserializable, so it can sit in whatever configuration file your application
/// already has; every field is optional.
///
/// ```rust
/// use field_keyring::{Algorithm, DigestAlgorithm, Options};
///
/// let options: Options =
///     serde_json::from_str(r#"{"algorithm": "aes-256-gcm", "digest_salt": "s"}"#).unwrap();
///
/// assert_eq!(Algorithm::Aes256Gcm, options.algorithm);
/// assert_eq!(DigestAlgorithm::Sha1, options.digest);
/// ```
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Options {
	pub algorithm: Algorithm,
	pub digest: DigestAlgorithm,
	pub digest_salt: String,
}

impl std::fmt::Debug for Options {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Options")
			.field("algorithm", &self.algorithm)
			.field("digest", &self.digest)
			.finish_non_exhaustive()
	}
}

impl Options {
	pub fn digester(&self) -> Digester {
		Digester::new(self.digest, self.digest_salt.clone())
	}
}
