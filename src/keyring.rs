use parking_lot::RwLock;
use serde::{Serialize, de::DeserializeOwned};
use std::{collections::BTreeMap, sync::Arc};

use super::{Digester, Encryptor, Error, IntoKeyId, Key, KeyId, Options};

/// A collection of numbered keys, which encrypts with the newest and decrypts with any of them.
///
/// Each key has a non-negative integer ID.  New data is always encrypted with the key with the
/// highest ID (unless you ask for a specific one), and [`Keyring::encrypt`] tells you which key
/// that was.  Store that key ID alongside the ciphertext, and hand it back to
/// [`Keyring::decrypt`] when you want the plaintext again.
///
/// Rotating keys is therefore a matter of [adding](Keyring::add) a key with a higher ID, then
/// (at your leisure) decrypting each stored value with its old key ID and encrypting it again
/// with no key ID at all, which [`Keyring::rotate`] will do for you.  Keep the old key in the
/// keyring until nothing refers to it any more; once it's gone, so is anything encrypted with it.
///
/// Every encryption also produces a *digest* of the plaintext, which doesn't depend on the key,
/// and so can be used to search for a value without decrypting everything.
///
/// A [`Keyring`] is a handle onto a shared set of keys: clones of it see the keys added to
/// (or cleared from) any other clone.  It is safe to use from many threads at once.
///
/// # Example
///
/// ```rust
/// use field_keyring::{Error, Keyring, KeyId, Options};
/// # fn main() -> Result<(), Error> {
///
/// let keyring = Keyring::with_options(
///     [("0", "uDiMcWVNTuz//naQ88sOcN+E40CyBRGzGTT7OkoBS6M=")],
///     &Options::default(),
/// )?;
///
/// let encrypted = keyring.encrypt(b"42", None)?;
/// assert_eq!(KeyId::new(0), encrypted.key_id);
/// assert_eq!("92cfceb39d57d914ed8b14d0e37643de0797ae56", encrypted.digest);
///
/// // Time passes, and a new key is deployed
/// keyring.add(1, "VN8UXRVMNbIh9FWEFVde0q7GUA1SGOie1+FgAKlNYHc=")?;
///
/// // Old ciphertexts still decrypt with the key that made them...
/// assert_eq!(b"42".to_vec(), keyring.decrypt(&encrypted.ciphertext, encrypted.key_id)?);
///
/// // ... and can be moved over to the new key
/// let rotated = keyring.rotate(&encrypted.ciphertext, encrypted.key_id)?;
/// assert_eq!(KeyId::new(1), rotated.key_id);
/// assert_eq!(encrypted.digest, rotated.digest);
/// # Ok(())
/// # }
/// ```
#[derive(Clone, Debug)]
pub struct Keyring {
	encryptor: Arc<dyn Encryptor>,
	digester: Digester,
	keys: Arc<RwLock<BTreeMap<KeyId, Key>>>,
}

// We don't panic while holding the lock
impl std::panic::UnwindSafe for Keyring {}
impl std::panic::RefUnwindSafe for Keyring {}

/// Everything that needs to be stored after encrypting a value.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Encrypted {
	/// The base64 ciphertext envelope.
	pub ciphertext: String,
	/// The ID of the key that produced `ciphertext`, which you'll need to decrypt it.
	pub key_id: KeyId,
	/// The hex digest of the plaintext.
	pub digest: String,
}

impl Keyring {
	/// Create a new [`Keyring`] from a collection of `(id, secret)` pairs.
	///
	/// Each secret must be valid for `encryptor`; see [`Key::new`] for what that means.  If
	/// two entries share an ID, the later one wins.
	///
	/// # Errors
	///
	/// The first [`Error::InvalidKeyId`] or [`Error::InvalidSecret`] encountered; no keyring is
	/// created if any key is bad.
	#[tracing::instrument(level = "debug", skip(keys, digester))]
	pub fn new(
		keys: impl IntoIterator<Item = (impl IntoKeyId, impl AsRef<[u8]>)>,
		encryptor: Arc<dyn Encryptor>,
		digester: impl Into<Digester>,
	) -> Result<Self, Error> {
		let mut key_map = BTreeMap::new();

		for (id, secret) in keys {
			let key = Key::new(id, secret, encryptor.key_size(), encryptor.authenticated())?;
			tracing::debug!(key_id=%key.id(), "Including key");
			key_map.insert(key.id(), key);
		}

		Ok(Self {
			encryptor,
			digester: digester.into(),
			keys: Arc::new(RwLock::new(key_map)),
		})
	}

	/// Create a new [`Keyring`] configured by `options`.
	///
	/// # Errors
	///
	/// As for [`Keyring::new`].
	pub fn with_options(
		keys: impl IntoIterator<Item = (impl IntoKeyId, impl AsRef<[u8]>)>,
		options: &Options,
	) -> Result<Self, Error> {
		Self::new(keys, options.algorithm.encryptor(), options.digester())
	}

	pub fn encryptor(&self) -> &dyn Encryptor {
		self.encryptor.as_ref()
	}

	/// Add a key, replacing any existing key with the same ID.
	///
	/// # Errors
	///
	/// [`Error::InvalidKeyId`] or [`Error::InvalidSecret`], in which case the keyring is
	/// unchanged.
	#[tracing::instrument(level = "debug", skip(self, id, secret))]
	pub fn add(&self, id: impl IntoKeyId, secret: impl AsRef<[u8]>) -> Result<(), Error> {
		let key = Key::new(
			id,
			secret,
			self.encryptor.key_size(),
			self.encryptor.authenticated(),
		)?;

		let key_id = key.id();
		if self.keys.write().insert(key_id, key).is_some() {
			tracing::debug!(%key_id, "Replaced key");
		} else {
			tracing::debug!(%key_id, "Added key");
		}

		Ok(())
	}

	/// Remove every key.
	///
	/// Anything encrypted with the removed keys can no longer be decrypted, unless the same
	/// keys are added back again.
	#[tracing::instrument(level = "debug", skip(self))]
	pub fn clear(&self) {
		self.keys.write().clear();
	}

	/// Find the key with the given ID.
	///
	/// # Errors
	///
	/// [`Error::UnknownKey`] if there's no such key, or [`Error::InvalidKeyId`] if `id` isn't
	/// a key ID at all.
	pub fn lookup(&self, id: impl IntoKeyId) -> Result<Key, Error> {
		let id = id.into_key_id()?;

		self.keys.read().get(&id).cloned().ok_or_else(|| {
			tracing::debug!(key_id=%id, "Key not found");
			Error::unknown_key(id)
		})
	}

	/// The key with the highest ID, if there are any keys at all.
	pub fn current_key(&self) -> Option<Key> {
		self.keys.read().last_key_value().map(|(_, k)| k.clone())
	}

	pub fn current_key_id(&self) -> Option<KeyId> {
		self.keys.read().last_key_value().map(|(id, _)| *id)
	}

	pub fn key_ids(&self) -> Vec<KeyId> {
		self.keys.read().keys().copied().collect()
	}

	pub fn is_empty(&self) -> bool {
		self.keys.read().is_empty()
	}

	/// Encrypt `plaintext`, with the key `key_id` or, if that is `None`, the current key.
	///
	/// # Errors
	///
	/// * [`Error::EmptyKeyring`] if `key_id` is `None` and there are no keys.
	/// * [`Error::UnknownKey`] if there's no key with ID `key_id`.
	/// * Whatever the [`Encryptor`] might return, which is nothing, unless the OS has run out
	///   of random numbers.
	#[tracing::instrument(level = "debug", skip(self, plaintext))]
	pub fn encrypt(
		&self,
		plaintext: impl AsRef<[u8]>,
		key_id: Option<KeyId>,
	) -> Result<Encrypted, Error> {
		let plaintext = plaintext.as_ref();
		let keys = self.keys.read();

		let key = match key_id {
			Some(id) => keys.get(&id).ok_or_else(|| {
				tracing::debug!(key_id=%id, "Key not found");
				Error::unknown_key(id)
			})?,
			None => keys
				.last_key_value()
				.map(|(_, k)| k)
				.ok_or(Error::EmptyKeyring)?,
		};

		tracing::debug!(key_id=%key.id(), encryptor=self.encryptor.name(), "Encrypting");

		Ok(Encrypted {
			ciphertext: self.encryptor.encrypt(key, plaintext)?,
			key_id: key.id(),
			digest: self.digester.digest(plaintext),
		})
	}

	/// Decrypt a ciphertext that was encrypted with the key `key_id`.
	///
	/// # Errors
	///
	/// * [`Error::UnknownKey`] if there's no key with ID `key_id`; there is no attempt to
	///   decrypt with any other key.
	/// * [`Error::InvalidAuthentication`] if the ciphertext has been tampered with, or was
	///   encrypted with a different key.
	/// * [`Error::Decryption`] or [`Error::InvalidCiphertext`] if the ciphertext is garbage.
	#[tracing::instrument(level = "debug", skip(self, ciphertext, key_id))]
	pub fn decrypt(
		&self,
		ciphertext: impl AsRef<str>,
		key_id: impl IntoKeyId,
	) -> Result<Vec<u8>, Error> {
		let key_id = key_id.into_key_id()?;
		let keys = self.keys.read();

		let Some(key) = keys.get(&key_id) else {
			tracing::debug!(%key_id, "Decryption key not found");
			return Err(Error::unknown_key(key_id));
		};

		tracing::debug!(%key_id, "Decrypting");
		self.encryptor.decrypt(key, ciphertext.as_ref())
	}

	/// Digest `plaintext` exactly as [`Keyring::encrypt`] would, without encrypting anything.
	///
	/// This is what you want to search for an encrypted value by its digest.
	pub fn digest(&self, plaintext: impl AsRef<[u8]>) -> String {
		self.digester.digest(plaintext)
	}

	/// Re-encrypt a ciphertext under the current key.
	///
	/// Running this on a ciphertext that's already under the current key is harmless; you get
	/// a fresh ciphertext of the same plaintext, with the same digest.
	///
	/// # Errors
	///
	/// Anything [`Keyring::decrypt`] or [`Keyring::encrypt`] might return.
	#[tracing::instrument(level = "debug", skip(self, ciphertext, key_id))]
	pub fn rotate(
		&self,
		ciphertext: impl AsRef<str>,
		key_id: impl IntoKeyId,
	) -> Result<Encrypted, Error> {
		let key_id = key_id.into_key_id()?;
		let plaintext = secrecy::zeroize::Zeroizing::new(self.decrypt(ciphertext, key_id)?);
		let encrypted = self.encrypt(&*plaintext, None)?;

		tracing::debug!(from=%key_id, to=%encrypted.key_id, "Rotated ciphertext");
		Ok(encrypted)
	}

	/// Serialize `value` as JSON, and encrypt that.
	///
	/// # Errors
	///
	/// [`Error::Serialization`] if `value` won't serialize, otherwise as for
	/// [`Keyring::encrypt`].
	pub fn encrypt_value<T: Serialize + ?Sized>(
		&self,
		value: &T,
		key_id: Option<KeyId>,
	) -> Result<Encrypted, Error> {
		let json = secrecy::zeroize::Zeroizing::new(serde_json::to_vec(value)?);
		self.encrypt(&*json, key_id)
	}

	/// Decrypt a ciphertext made by [`Keyring::encrypt_value`], and deserialize the JSON inside.
	///
	/// # Errors
	///
	/// As for [`Keyring::decrypt`], or [`Error::Serialization`] if the plaintext isn't a
	/// valid `T`.
	pub fn decrypt_value<T: DeserializeOwned>(
		&self,
		ciphertext: impl AsRef<str>,
		key_id: impl IntoKeyId,
	) -> Result<T, Error> {
		let json = secrecy::zeroize::Zeroizing::new(self.decrypt(ciphertext, key_id)?);
		Ok(serde_json::from_slice(&json)?)
	}
}
