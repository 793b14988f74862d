use aes_gcm::{
	Aes256Gcm,
	aead::{AeadInPlace as _, KeyInit as _, Nonce, Tag},
};
use base64::{Engine as _, engine::general_purpose::STANDARD};

use super::{
	Encryptor, Error, Key,
	encryptor::{self, HMAC_SIZE},
	key::fill_random,
};

const IV_SIZE: usize = 12;
const TAG_SIZE: usize = 16;

/// AES-256 in GCM mode, with an HMAC-SHA256 over the top.
///
/// GCM authenticates on its own, so the HMAC is belt-and-braces; it's there so that every
/// authenticated envelope this crate produces is checked the same way before any cipher gets a
/// look at it.  Secrets are 64 bytes: 32 for the HMAC, then 32 for the cipher.
///
/// ```text
/// base64( HMAC-SHA256(signing_key, tag || IV || ciphertext) || tag || IV || ciphertext )
/// ```
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct AesGcm;

impl Encryptor for AesGcm {
	fn name(&self) -> &'static str {
		"aes-256-gcm"
	}

	fn key_size(&self) -> usize {
		32
	}

	fn authenticated(&self) -> bool {
		true
	}

	#[tracing::instrument(level = "trace", skip(plaintext))]
	fn encrypt(&self, key: &Key, plaintext: &[u8]) -> Result<String, Error> {
		let cipher = Aes256Gcm::new_from_slice(key.expose_encryption_key()).map_err(|_| {
			tracing::debug!("Encryption key is the wrong size for this cipher");
			Error::Encryption
		})?;

		let mut iv = [0u8; IV_SIZE];
		fill_random(&mut iv)?;

		let mut ciphertext = plaintext.to_vec();
		let tag = cipher
			.encrypt_in_place_detached(Nonce::<Aes256Gcm>::from_slice(&iv), b"", &mut ciphertext)
			.map_err(|_| Error::Encryption)?;

		let hmac = encryptor::sign(
			encryptor::signing_key(key)?,
			&[&tag[..], &iv[..], &ciphertext[..]],
		)?;

		let mut envelope =
			Vec::with_capacity(HMAC_SIZE + TAG_SIZE + IV_SIZE + ciphertext.len());
		envelope.extend_from_slice(&hmac);
		envelope.extend_from_slice(&tag);
		envelope.extend_from_slice(&iv);
		envelope.extend_from_slice(&ciphertext);

		Ok(STANDARD.encode(envelope))
	}

	#[tracing::instrument(level = "trace", skip(envelope))]
	fn decrypt(&self, key: &Key, envelope: &str) -> Result<Vec<u8>, Error> {
		let envelope = STANDARD
			.decode(envelope)
			.map_err(|e| Error::invalid_ciphertext(e.to_string()))?;

		let payload = encryptor::verify(key, &envelope)?;

		let Some((tag, rest)) = payload.split_first_chunk::<TAG_SIZE>() else {
			tracing::debug!(len = payload.len(), "Envelope too short to carry a tag");
			return Err(Error::Decryption);
		};
		let Some((iv, ciphertext)) = rest.split_first_chunk::<IV_SIZE>() else {
			tracing::debug!(len = payload.len(), "Envelope too short to carry an IV");
			return Err(Error::Decryption);
		};

		let cipher = Aes256Gcm::new_from_slice(key.expose_encryption_key()).map_err(|_| {
			tracing::debug!("Encryption key is the wrong size for this cipher");
			Error::Decryption
		})?;

		let mut plaintext = ciphertext.to_vec();
		cipher
			.decrypt_in_place_detached(
				Nonce::<Aes256Gcm>::from_slice(iv),
				b"",
				&mut plaintext,
				Tag::<Aes256Gcm>::from_slice(tag),
			)
			.map_err(|_| {
				tracing::debug!("GCM tag mismatch");
				Error::Decryption
			})?;

		Ok(plaintext)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::generate_secret;

	fn key() -> Key {
		Key::new(0, generate_secret(&AesGcm).unwrap(), 32, true).unwrap()
	}

	#[test]
	fn round_trips() {
		let key = key();
		let plaintexts: [&[u8]; 3] = [b"", b"42", &[0x42u8; 1000]];

		for plaintext in plaintexts {
			let envelope = AesGcm.encrypt(&key, plaintext).unwrap();
			assert_eq!(plaintext.to_vec(), AesGcm.decrypt(&key, &envelope).unwrap());
		}
	}

	#[test]
	fn envelope_layout() {
		let envelope = STANDARD
			.decode(AesGcm.encrypt(&key(), b"42").unwrap())
			.unwrap();

		// GCM is a stream mode, so there's no padding
		assert_eq!(HMAC_SIZE + TAG_SIZE + IV_SIZE + 2, envelope.len());
	}

	#[test]
	fn every_bit_flip_is_detected() {
		let key = key();
		let envelope = STANDARD
			.decode(AesGcm.encrypt(&key, b"attack at dawn").unwrap())
			.unwrap();

		for byte in 0..envelope.len() {
			for bit in 0..8 {
				let mut tampered = envelope.clone();
				tampered[byte] ^= 1 << bit;

				assert!(matches!(
					AesGcm.decrypt(&key, &STANDARD.encode(&tampered)),
					Err(Error::InvalidAuthentication)
				));
			}
		}
	}

	#[test]
	fn gcm_tag_is_still_checked() {
		let key = key();
		let mut envelope = STANDARD
			.decode(AesGcm.encrypt(&key, b"attack at dawn").unwrap())
			.unwrap();

		// Mangle the GCM tag, then fix up the HMAC so only the cipher can notice
		envelope[HMAC_SIZE] ^= 0x01;
		let hmac = encryptor::sign(key.expose_signing_key().unwrap(), &[&envelope[HMAC_SIZE..]])
			.unwrap();
		envelope[..HMAC_SIZE].copy_from_slice(&hmac);

		assert!(matches!(
			AesGcm.decrypt(&key, &STANDARD.encode(&envelope)),
			Err(Error::Decryption)
		));
	}

	#[test]
	fn short_envelopes_are_rejected() {
		let key = key();

		// Properly signed, but with nowhere near enough behind the HMAC
		let payload = [0u8; TAG_SIZE + IV_SIZE - 1];
		let hmac = encryptor::sign(key.expose_signing_key().unwrap(), &[&payload[..]]).unwrap();
		let envelope = STANDARD.encode([&hmac[..], &payload[..]].concat());

		assert!(matches!(
			AesGcm.decrypt(&key, &envelope),
			Err(Error::Decryption)
		));
	}
}
