use aes::cipher::{
	BlockCipher, BlockDecryptMut, BlockEncryptMut, KeyInit, KeyIvInit as _, block_padding::Pkcs7,
};
use base64::{Engine as _, engine::general_purpose::STANDARD};

use super::{
	Encryptor, Error, Key,
	encryptor::{self, HMAC_SIZE},
	key::fill_random,
};

const IV_SIZE: usize = 16;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Strength {
	Aes128,
	Aes192,
	Aes256,
}

/// AES in CBC mode with PKCS#7 padding, optionally wrapped in an HMAC-SHA256.
///
/// With authentication (the default), secrets are twice the cipher's key size: the first half
/// keys the HMAC, and the second half keys the cipher.  Envelopes look like this:
///
/// ```text
/// base64( HMAC-SHA256(signing_key, IV || ciphertext) || IV || ciphertext )
/// ```
///
/// Without authentication, the HMAC is simply left off, and the secret is only as long as the
/// cipher key.  You should only want that for reading data written by something which didn't
/// know any better.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AesCbc {
	strength: Strength,
	authenticated: bool,
}

impl AesCbc {
	pub const fn aes128() -> Self {
		Self::new(Strength::Aes128)
	}

	pub const fn aes192() -> Self {
		Self::new(Strength::Aes192)
	}

	pub const fn aes256() -> Self {
		Self::new(Strength::Aes256)
	}

	const fn new(strength: Strength) -> Self {
		Self {
			strength,
			authenticated: true,
		}
	}

	/// The same cipher, but with no HMAC on the envelope.
	pub const fn unauthenticated(self) -> Self {
		Self {
			authenticated: false,
			..self
		}
	}

	fn cbc_encrypt(&self, key: &[u8], iv: &[u8], plaintext: &[u8]) -> Result<Vec<u8>, Error> {
		match self.strength {
			Strength::Aes128 => encrypt_with::<aes::Aes128>(key, iv, plaintext),
			Strength::Aes192 => encrypt_with::<aes::Aes192>(key, iv, plaintext),
			Strength::Aes256 => encrypt_with::<aes::Aes256>(key, iv, plaintext),
		}
	}

	fn cbc_decrypt(&self, key: &[u8], iv: &[u8], ciphertext: &[u8]) -> Result<Vec<u8>, Error> {
		match self.strength {
			Strength::Aes128 => decrypt_with::<aes::Aes128>(key, iv, ciphertext),
			Strength::Aes192 => decrypt_with::<aes::Aes192>(key, iv, ciphertext),
			Strength::Aes256 => decrypt_with::<aes::Aes256>(key, iv, ciphertext),
		}
	}
}

impl Encryptor for AesCbc {
	fn name(&self) -> &'static str {
		match (self.strength, self.authenticated) {
			(Strength::Aes128, true) => "aes-128-cbc",
			(Strength::Aes192, true) => "aes-192-cbc",
			(Strength::Aes256, true) => "aes-256-cbc",
			(Strength::Aes128, false) => "aes-128-cbc-unauthenticated",
			(Strength::Aes192, false) => "aes-192-cbc-unauthenticated",
			(Strength::Aes256, false) => "aes-256-cbc-unauthenticated",
		}
	}

	fn key_size(&self) -> usize {
		match self.strength {
			Strength::Aes128 => 16,
			Strength::Aes192 => 24,
			Strength::Aes256 => 32,
		}
	}

	fn authenticated(&self) -> bool {
		self.authenticated
	}

	#[tracing::instrument(level = "trace", skip(plaintext))]
	fn encrypt(&self, key: &Key, plaintext: &[u8]) -> Result<String, Error> {
		let mut iv = [0u8; IV_SIZE];
		fill_random(&mut iv)?;

		let ciphertext = self.cbc_encrypt(key.expose_encryption_key(), &iv, plaintext)?;

		let mut envelope = Vec::with_capacity(HMAC_SIZE + IV_SIZE + ciphertext.len());

		if self.authenticated {
			let hmac = encryptor::sign(encryptor::signing_key(key)?, &[&iv[..], &ciphertext[..]])?;
			envelope.extend_from_slice(&hmac);
		}

		envelope.extend_from_slice(&iv);
		envelope.extend_from_slice(&ciphertext);

		Ok(STANDARD.encode(envelope))
	}

	#[tracing::instrument(level = "trace", skip(envelope))]
	fn decrypt(&self, key: &Key, envelope: &str) -> Result<Vec<u8>, Error> {
		let envelope = STANDARD
			.decode(envelope)
			.map_err(|e| Error::invalid_ciphertext(e.to_string()))?;

		let payload = if self.authenticated {
			encryptor::verify(key, &envelope)?
		} else {
			&envelope[..]
		};

		let Some((iv, ciphertext)) = payload.split_first_chunk::<IV_SIZE>() else {
			tracing::debug!(len = payload.len(), "Envelope too short to carry an IV");
			return Err(Error::Decryption);
		};

		self.cbc_decrypt(key.expose_encryption_key(), iv, ciphertext)
	}
}

fn encrypt_with<C>(key: &[u8], iv: &[u8], plaintext: &[u8]) -> Result<Vec<u8>, Error>
where
	C: BlockEncryptMut + BlockCipher + KeyInit,
{
	let cipher = cbc::Encryptor::<C>::new_from_slices(key, iv).map_err(|_| {
		tracing::debug!(len = key.len(), "Encryption key is the wrong size for this cipher");
		Error::Encryption
	})?;

	Ok(cipher.encrypt_padded_vec_mut::<Pkcs7>(plaintext))
}

fn decrypt_with<C>(key: &[u8], iv: &[u8], ciphertext: &[u8]) -> Result<Vec<u8>, Error>
where
	C: BlockDecryptMut + BlockCipher + KeyInit,
{
	let cipher = cbc::Decryptor::<C>::new_from_slices(key, iv).map_err(|_| {
		tracing::debug!(len = key.len(), "Encryption key is the wrong size for this cipher");
		Error::Decryption
	})?;

	cipher.decrypt_padded_vec_mut::<Pkcs7>(ciphertext).map_err(|_| {
		tracing::debug!("Padding check failed");
		Error::Decryption
	})
}
