use serde::{Deserialize, Serialize};
use sha1::Sha1;
use sha2::{Digest as _, Sha256};

use super::Error;

/// The hash used to compute lookup digests of plaintexts.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DigestAlgorithm {
	#[default]
	#[serde(rename = "sha1")]
	Sha1,
	#[serde(rename = "sha256")]
	Sha256,
}

impl DigestAlgorithm {
	pub fn name(&self) -> &'static str {
		match self {
			Self::Sha1 => "sha1",
			Self::Sha256 => "sha256",
		}
	}
}

impl std::fmt::Display for DigestAlgorithm {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.write_str(self.name())
	}
}

impl std::str::FromStr for DigestAlgorithm {
	type Err = Error;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match s {
			"sha1" => Ok(Self::Sha1),
			"sha256" => Ok(Self::Sha256),
			_ => Err(Error::unknown_algorithm(s)),
		}
	}
}

/// Computes the deterministic, keyless digest of a plaintext.
///
/// The digest lets you look up or compare encrypted values without decrypting them.  It
/// depends *only* on the plaintext and the (optional) salt, so it stays put when keys rotate.
/// The salt is appended to the plaintext before hashing.
///
/// Bear in mind that an unsalted digest of a low-entropy value (a PIN, say) is trivially
/// brute-forced, so salt it if you can.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Digester {
	algorithm: DigestAlgorithm,
	salt: String,
}

// The salt is frequently a pepper, so it stays out of logs
impl std::fmt::Debug for Digester {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Digester")
			.field("algorithm", &self.algorithm)
			.finish_non_exhaustive()
	}
}

impl Digester {
	pub fn new(algorithm: DigestAlgorithm, salt: impl Into<String>) -> Self {
		Self {
			algorithm,
			salt: salt.into(),
		}
	}

	pub fn algorithm(&self) -> DigestAlgorithm {
		self.algorithm
	}

	/// Hex-encoded digest of `plaintext`.
	pub fn digest(&self, plaintext: impl AsRef<[u8]>) -> String {
		match self.algorithm {
			DigestAlgorithm::Sha1 => hex::encode(
				Sha1::new()
					.chain_update(plaintext)
					.chain_update(&self.salt)
					.finalize(),
			),
			DigestAlgorithm::Sha256 => hex::encode(
				Sha256::new()
					.chain_update(plaintext)
					.chain_update(&self.salt)
					.finalize(),
			),
		}
	}
}

impl From<DigestAlgorithm> for Digester {
	fn from(algorithm: DigestAlgorithm) -> Self {
		Self::new(algorithm, "")
	}
}
