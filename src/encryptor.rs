use hmac::{Hmac, Mac as _};
use sha2::Sha256;

use super::{Error, Key};

pub(crate) const HMAC_SIZE: usize = 32;

type HmacSha256 = Hmac<Sha256>;

/// A cipher strategy that turns plaintext into a ciphertext "envelope", and back again.
///
/// An envelope is a base64 string which carries everything (IV, authentication tag, HMAC)
/// needed to decrypt it, *except* the key.  Which key produced it is for the caller to remember,
/// which is what the key ID returned by [`Keyring::encrypt`](super::Keyring::encrypt) is for.
///
/// Envelopes made by one encryptor are not readable by another, so [`Encryptor::name`] is the
/// thing to record if you ever need to tell envelope formats apart.
pub trait Encryptor: std::fmt::Debug + Send + Sync {
	/// The stable name of this envelope format, such as `aes-128-cbc`.
	fn name(&self) -> &'static str;

	/// Number of bytes in each of the encryption and signing keys.
	fn key_size(&self) -> usize;

	/// Whether envelopes carry an HMAC, and therefore whether keys need a signing half.
	fn authenticated(&self) -> bool;

	/// Encrypt `plaintext` with `key`, producing a base64 envelope.
	///
	/// # Errors
	///
	/// * [`Error::Randomness`] if no IV could be generated.
	/// * [`Error::Encryption`] if `key` doesn't fit this encryptor.
	fn encrypt(&self, key: &Key, plaintext: &[u8]) -> Result<String, Error>;

	/// Decrypt an envelope previously produced by [`Encryptor::encrypt`] with the same key.
	///
	/// # Errors
	///
	/// * [`Error::InvalidCiphertext`] if the envelope isn't base64.
	/// * [`Error::InvalidAuthentication`] if the HMAC doesn't match, in which case no
	///   decryption is attempted at all.
	/// * [`Error::Decryption`] if the cipher itself rejects the envelope.
	fn decrypt(&self, key: &Key, envelope: &str) -> Result<Vec<u8>, Error>;
}

/// Compute the HMAC-SHA256 of the concatenation of `parts`.
pub(crate) fn sign(signing_key: &[u8], parts: &[&[u8]]) -> Result<[u8; HMAC_SIZE], Error> {
	let mut mac = HmacSha256::new_from_slice(signing_key).map_err(|_| Error::Encryption)?;

	for part in parts {
		mac.update(part);
	}

	Ok(mac.finalize().into_bytes().into())
}

/// Check the HMAC at the front of `envelope`, and hand back whatever follows it.
pub(crate) fn verify<'a>(key: &Key, envelope: &'a [u8]) -> Result<&'a [u8], Error> {
	let Some(signing_key) = key.expose_signing_key() else {
		tracing::debug!(key_id=%key.id(), "Key has no signing half");
		return Err(Error::InvalidAuthentication);
	};

	let Some((claimed, payload)) = envelope.split_first_chunk::<HMAC_SIZE>() else {
		tracing::debug!(len = envelope.len(), "Envelope too short to carry an HMAC");
		return Err(Error::InvalidAuthentication);
	};

	let expected = sign(signing_key, &[payload]).map_err(|_| Error::InvalidAuthentication)?;

	if constant_time_eq::constant_time_eq_n(&expected, claimed) {
		Ok(payload)
	} else {
		tracing::debug!(key_id=%key.id(), "HMAC mismatch");
		Err(Error::InvalidAuthentication)
	}
}

pub(crate) fn signing_key(key: &Key) -> Result<&[u8], Error> {
	key.expose_signing_key().ok_or_else(|| {
		tracing::debug!(key_id=%key.id(), "Key has no signing half");
		Error::Encryption
	})
}

#[cfg(test)]
mod tests {
	use super::*;

	fn key() -> Key {
		Key::new(0, [[b'S'; 16], [b'E'; 16]].concat(), 16, true).unwrap()
	}

	#[test]
	fn signing_covers_every_part() {
		let k = b"signing key";

		assert_eq!(
			sign(k, &[&b"abc"[..], &b"def"[..]]).unwrap(),
			sign(k, &[&b"abcdef"[..]]).unwrap()
		);
		assert_ne!(
			sign(k, &[&b"abc"[..], &b"def"[..]]).unwrap(),
			sign(k, &[&b"abc"[..]]).unwrap()
		);
	}

	#[test]
	fn verify_strips_a_good_hmac() {
		let key = key();
		let payload: &[u8] = b"some payload";
		let mut envelope = sign(key.expose_signing_key().unwrap(), &[payload])
			.unwrap()
			.to_vec();
		envelope.extend_from_slice(payload);

		assert_eq!(payload, verify(&key, &envelope).unwrap());
	}

	#[test]
	fn verify_rejects_a_bad_hmac() {
		let key = key();
		let mut envelope = vec![0u8; HMAC_SIZE];
		envelope.extend_from_slice(b"some payload");

		assert!(matches!(
			verify(&key, &envelope),
			Err(Error::InvalidAuthentication)
		));
	}

	#[test]
	fn verify_rejects_a_truncated_envelope() {
		assert!(matches!(
			verify(&key(), &[0u8; HMAC_SIZE - 1]),
			Err(Error::InvalidAuthentication)
		));
	}

	#[test]
	fn verify_needs_a_signing_key() {
		let key = Key::new(0, [b'E'; 16], 16, false).unwrap();

		assert!(matches!(
			verify(&key, &[0u8; 64]),
			Err(Error::InvalidAuthentication)
		));
	}
}
