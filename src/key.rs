use base64::{
	Engine as _,
	alphabet,
	engine::{
		DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig,
		general_purpose::STANDARD,
	},
};
use rand::{TryRngCore as _, rngs::OsRng};
use secrecy::{ExposeSecret as _, SecretBox, SecretSlice, zeroize::Zeroizing};

use super::{Encryptor, Error, IntoKeyId, KeyId};

// Secrets pasted out of config files and `base64` output come with all manner of line wrapping
// and padding sloppiness, so the fallback decoder forgives both
const PERMISSIVE: GeneralPurpose = GeneralPurpose::new(
	&alphabet::STANDARD,
	GeneralPurposeConfig::new()
		.with_decode_padding_mode(DecodePaddingMode::Indifferent)
		.with_decode_allow_trailing_bits(true),
);

/// One identified secret in a [`Keyring`](super::Keyring).
///
/// The secret is decoded when the key is created, and (for authenticated encryptors) split
/// into a signing half and an encryption half.  The key material itself is never shown by
/// [`Debug`] or [`Display`](std::fmt::Display); all you'll ever see is the ID.
///
/// ```rust
/// use field_keyring::Key;
///
/// let key = Key::new("1", "uDiMcWVNTuz//naQ88sOcN+E40CyBRGzGTT7OkoBS6M=", 16, true).unwrap();
/// assert_eq!("<Key id=1>", key.to_string());
/// ```
pub struct Key {
	id: KeyId,
	encryption_key: SecretSlice<u8>,
	signing_key: Option<SecretSlice<u8>>,
}

impl Key {
	/// Parse `secret` into a key of `key_size` bytes (or twice that, if `authenticated`).
	///
	/// The secret can be the raw bytes themselves, or base64 text which decodes to the right
	/// number of bytes.
	///
	/// # Errors
	///
	/// * [`Error::InvalidKeyId`] if `id` isn't a non-negative integer.
	/// * [`Error::InvalidSecret`] if the secret doesn't decode to exactly the expected length.
	#[tracing::instrument(level = "trace", skip(id, secret))]
	pub fn new(
		id: impl IntoKeyId,
		secret: impl AsRef<[u8]>,
		key_size: usize,
		authenticated: bool,
	) -> Result<Self, Error> {
		let id = id.into_key_id()?;

		let expected = if authenticated {
			key_size * 2
		} else {
			key_size
		};

		let secret = decode_secret(secret.as_ref(), expected)?;

		let (signing_key, encryption_key) = if authenticated {
			(
				Some(secret_slice(&secret[..key_size])),
				secret_slice(&secret[key_size..]),
			)
		} else {
			(None, secret_slice(&secret))
		};

		tracing::trace!(key_id=%id, "Parsed key");

		Ok(Self {
			id,
			encryption_key,
			signing_key,
		})
	}

	pub fn id(&self) -> KeyId {
		self.id
	}

	/// The bytes used to key the cipher itself.
	pub fn expose_encryption_key(&self) -> &[u8] {
		self.encryption_key.expose_secret()
	}

	/// The bytes used to key the HMAC, if this key was parsed for an authenticated encryptor.
	pub fn expose_signing_key(&self) -> Option<&[u8]> {
		self.signing_key.as_ref().map(|k| k.expose_secret())
	}
}

impl Clone for Key {
	fn clone(&self) -> Self {
		Self {
			id: self.id,
			encryption_key: secret_slice(self.expose_encryption_key()),
			signing_key: self.expose_signing_key().map(secret_slice),
		}
	}
}

impl std::fmt::Display for Key {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.write_fmt(format_args!("<Key id={}>", self.id))
	}
}

impl std::fmt::Debug for Key {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		std::fmt::Display::fmt(self, f)
	}
}

fn secret_slice(bytes: &[u8]) -> SecretSlice<u8> {
	SecretBox::new(bytes.to_vec().into_boxed_slice())
}

fn decode_secret(secret: &[u8], expected: usize) -> Result<Zeroizing<Vec<u8>>, Error> {
	if secret.len() == expected {
		return Ok(Zeroizing::new(secret.to_vec()));
	}

	let decoded = STANDARD.decode(secret).or_else(|_| {
		let stripped: Zeroizing<Vec<u8>> = Zeroizing::new(
			secret
				.iter()
				.copied()
				.filter(|b| !b.is_ascii_whitespace())
				.collect(),
		);
		PERMISSIVE.decode(&*stripped)
	});

	match decoded.map(Zeroizing::new) {
		Ok(bytes) if bytes.len() == expected => Ok(bytes),
		Ok(bytes) => Err(Error::invalid_secret(expected, bytes.len())),
		// Wasn't base64 at all, so the raw bytes are what we were given
		Err(_) => Err(Error::invalid_secret(expected, secret.len())),
	}
}

/// Fill `buf` from the operating system's secure random number generator.
///
/// There is deliberately no fallback here: if the OS can't give us randomness, nothing gets
/// encrypted.
pub(crate) fn fill_random(buf: &mut [u8]) -> Result<(), Error> {
	OsRng.try_fill_bytes(buf).map_err(|e| {
		tracing::error!(error=%e, "OS random number generator failed");
		Error::randomness(e.to_string())
	})
}

/// Create a base64-encoded secret of the right size for use with `encryptor`.
///
/// Most of the time your secrets will live somewhere out of the way, like a secrets manager,
/// but for tests (and for generating the secrets you're going to put in that secrets manager)
/// it's handy to have a way to make one.
///
/// # Errors
///
/// [`Error::Randomness`] if the operating system's random number generator is unavailable.
#[tracing::instrument(level = "debug", skip(encryptor))]
pub fn generate_secret(encryptor: &dyn Encryptor) -> Result<String, Error> {
	let size = if encryptor.authenticated() {
		encryptor.key_size() * 2
	} else {
		encryptor.key_size()
	};

	let mut secret = Zeroizing::new(vec![0u8; size]);
	fill_random(&mut secret)?;

	Ok(STANDARD.encode(&*secret))
}
