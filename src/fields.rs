use secrecy::zeroize::Zeroizing;
use std::collections::HashMap;

use super::{Error, KeyId, Keyring};

/// Where one encrypted field of a record of type `R` keeps its ciphertext (and, optionally,
/// its digest).
///
/// The accessors are plain functions, so they're usually closures that poke at a struct field:
///
/// ```rust
/// use field_keyring::EncryptedField;
///
/// struct User {
///     encrypted_email: Option<String>,
///     email_digest: Option<String>,
/// }
///
/// let email = EncryptedField::new(
///     "email",
///     |u: &User| u.encrypted_email.as_deref(),
///     |u: &mut User, v| u.encrypted_email = v,
/// )
/// .with_digest(|u: &mut User, v| u.email_digest = v);
/// ```
pub struct EncryptedField<R> {
	name: &'static str,
	ciphertext: fn(&R) -> Option<&str>,
	set_ciphertext: fn(&mut R, Option<String>),
	set_digest: Option<fn(&mut R, Option<String>)>,
}

impl<R> EncryptedField<R> {
	pub fn new(
		name: &'static str,
		ciphertext: fn(&R) -> Option<&str>,
		set_ciphertext: fn(&mut R, Option<String>),
	) -> Self {
		Self {
			name,
			ciphertext,
			set_ciphertext,
			set_digest: None,
		}
	}

	/// Also store the digest of the plaintext whenever the field is written.
	pub fn with_digest(self, set_digest: fn(&mut R, Option<String>)) -> Self {
		Self {
			set_digest: Some(set_digest),
			..self
		}
	}

	pub fn name(&self) -> &'static str {
		self.name
	}

	fn store(&self, record: &mut R, ciphertext: Option<String>, digest: Option<String>) {
		(self.set_ciphertext)(record, ciphertext);

		if let Some(set_digest) = self.set_digest {
			set_digest(record, digest);
		}
	}
}

impl<R> std::fmt::Debug for EncryptedField<R> {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("EncryptedField")
			.field("name", &self.name)
			.field("digest", &self.set_digest.is_some())
			.finish()
	}
}

/// Decrypted field values for one record, so that reading a field twice only decrypts it once.
///
/// Keep one of these alongside each record, and [`clear`](FieldCache::clear) it whenever the
/// record is reloaded from storage.  Writing a field through a [`FieldRegistry`] invalidates
/// that field automatically.
#[derive(Default)]
pub struct FieldCache {
	values: HashMap<&'static str, Zeroizing<Vec<u8>>>,
}

impl FieldCache {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn invalidate(&mut self, field: &str) {
		self.values.remove(field);
	}

	pub fn clear(&mut self) {
		self.values.clear();
	}

	pub fn contains(&self, field: &str) -> bool {
		self.values.contains_key(field)
	}
}

impl std::fmt::Debug for FieldCache {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_set().entries(self.values.keys()).finish()
	}
}

/// The encrypted fields of one type of record, and the [`Keyring`] that protects them.
///
/// All the fields of a record share one key ID, stored in the record by `set_key_id`.  A record
/// that has never had a field written has no key ID yet, and gets the keyring's current key
/// when it does.  After that, writes stick with the record's key until the whole record is
/// moved onto the current key with [`FieldRegistry::rotate`] (which is a sensible thing to do
/// every time you save it).
///
/// # Example
///
/// ```rust
/// use field_keyring::{EncryptedField, Error, FieldCache, FieldRegistry, KeyId, Keyring, Options};
/// # fn main() -> Result<(), Error> {
///
/// #[derive(Default)]
/// struct User {
///     encrypted_secret: Option<String>,
///     secret_digest: Option<String>,
///     keyring_id: Option<KeyId>,
/// }
///
/// let keyring = Keyring::with_options(
///     [("0", "uDiMcWVNTuz//naQ88sOcN+E40CyBRGzGTT7OkoBS6M=")],
///     &Options::default(),
/// )?;
///
/// let users = FieldRegistry::new(
///     keyring.clone(),
///     |u: &User| u.keyring_id,
///     |u, id| u.keyring_id = Some(id),
/// )
/// .field(
///     EncryptedField::new(
///         "secret",
///         |u: &User| u.encrypted_secret.as_deref(),
///         |u, v| u.encrypted_secret = v,
///     )
///     .with_digest(|u, v| u.secret_digest = v),
/// );
///
/// let mut user = User::default();
/// let mut cache = FieldCache::new();
///
/// users.write(&mut user, &mut cache, "secret", Some("42"))?;
/// assert_eq!(Some(KeyId::new(0)), user.keyring_id);
/// assert_eq!(Some(b"42".to_vec()), users.read(&user, &mut cache, "secret")?);
///
/// keyring.add(1, "VN8UXRVMNbIh9FWEFVde0q7GUA1SGOie1+FgAKlNYHc=")?;
/// users.rotate(&mut user, &mut cache)?;
/// assert_eq!(Some(KeyId::new(1)), user.keyring_id);
/// # Ok(())
/// # }
/// ```
pub struct FieldRegistry<R> {
	keyring: Keyring,
	key_id: fn(&R) -> Option<KeyId>,
	set_key_id: fn(&mut R, KeyId),
	fields: Vec<EncryptedField<R>>,
}

impl<R> FieldRegistry<R> {
	pub fn new(
		keyring: Keyring,
		key_id: fn(&R) -> Option<KeyId>,
		set_key_id: fn(&mut R, KeyId),
	) -> Self {
		Self {
			keyring,
			key_id,
			set_key_id,
			fields: Vec::new(),
		}
	}

	/// Register another encrypted field.
	pub fn field(mut self, field: EncryptedField<R>) -> Self {
		self.fields.push(field);
		self
	}

	pub fn keyring(&self) -> &Keyring {
		&self.keyring
	}

	pub fn fields(&self) -> impl Iterator<Item = &EncryptedField<R>> {
		self.fields.iter()
	}

	fn find(&self, name: &str) -> Result<&EncryptedField<R>, Error> {
		self.fields
			.iter()
			.find(|f| f.name == name)
			.ok_or_else(|| Error::unknown_field(name))
	}

	/// Encrypt `value` into the field `name` of `record`.
	///
	/// An absent or empty value clears both the ciphertext and the digest.
	///
	/// # Errors
	///
	/// * [`Error::UnknownField`] if no field called `name` was registered.
	/// * [`Error::EmptyKeyring`] if the record has no key ID yet, and the keyring has no keys.
	/// * [`Error::UnknownKey`] if the record's key is no longer in the keyring.
	#[tracing::instrument(level = "debug", skip(self, record, cache, value))]
	pub fn write(
		&self,
		record: &mut R,
		cache: &mut FieldCache,
		name: &str,
		value: Option<impl AsRef<[u8]>>,
	) -> Result<(), Error> {
		let field = self.find(name)?;
		cache.invalidate(field.name);

		let value = value.filter(|v| !v.as_ref().is_empty());

		let Some(value) = value else {
			tracing::debug!(field = field.name, "Clearing field");
			field.store(record, None, None);
			return Ok(());
		};

		let encrypted = self.keyring.encrypt(value, (self.key_id)(record))?;

		(self.set_key_id)(record, encrypted.key_id);
		field.store(record, Some(encrypted.ciphertext), Some(encrypted.digest));

		Ok(())
	}

	/// Decrypt the field `name` of `record`, or return the cached plaintext if it has already
	/// been decrypted.
	///
	/// # Errors
	///
	/// * [`Error::UnknownField`] if no field called `name` was registered.
	/// * [`Error::UnknownKey`] if the record's key is no longer in the keyring.
	/// * [`Error::InvalidKeyId`] if the record has a ciphertext but no key ID.
	/// * Anything else [`Keyring::decrypt`] might return.
	#[tracing::instrument(level = "debug", skip(self, record, cache))]
	pub fn read(
		&self,
		record: &R,
		cache: &mut FieldCache,
		name: &str,
	) -> Result<Option<Vec<u8>>, Error> {
		let field = self.find(name)?;

		if let Some(value) = cache.values.get(field.name) {
			return Ok(Some(value.to_vec()));
		}

		let Some(ciphertext) = (field.ciphertext)(record) else {
			return Ok(None);
		};

		let Some(key_id) = (self.key_id)(record) else {
			tracing::debug!(field = field.name, "Record has a ciphertext but no key ID");
			return Err(Error::invalid_key_id(""));
		};

		let plaintext = self.keyring.decrypt(ciphertext, key_id)?;
		cache
			.values
			.insert(field.name, Zeroizing::new(plaintext.clone()));

		Ok(Some(plaintext))
	}

	/// Re-encrypt every field of `record` with the keyring's current key.
	///
	/// Digests are rewritten too, although they won't have changed.  If the keyring is
	/// empty, nothing happens.
	///
	/// # Errors
	///
	/// Anything [`FieldRegistry::read`] or [`Keyring::encrypt`] might return.  The record may
	/// have been partially re-encrypted when that happens, so don't save it.
	#[tracing::instrument(level = "debug", skip(self, record, cache))]
	pub fn rotate(&self, record: &mut R, cache: &mut FieldCache) -> Result<(), Error> {
		let Some(current) = self.keyring.current_key_id() else {
			tracing::debug!("Keyring is empty, not rotating");
			return Ok(());
		};

		// Decrypt everything before touching the record, because the key ID is shared
		let mut plaintexts = Vec::with_capacity(self.fields.len());
		for field in &self.fields {
			let value = self.read(record, cache, field.name)?.map(Zeroizing::new);
			plaintexts.push(value);
		}

		for (field, value) in self.fields.iter().zip(plaintexts) {
			match value {
				Some(value) if !value.is_empty() => {
					let encrypted = self.keyring.encrypt(&*value, Some(current))?;
					field.store(record, Some(encrypted.ciphertext), Some(encrypted.digest));
				}
				_ => (),
			}
		}

		if (self.key_id)(record) != Some(current) {
			tracing::debug!(key_id=%current, "Record moved to current key");
		}
		(self.set_key_id)(record, current);

		Ok(())
	}
}

impl<R> std::fmt::Debug for FieldRegistry<R> {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("FieldRegistry")
			.field("keyring", &self.keyring)
			.field("fields", &self.fields)
			.finish()
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::Options;

	const KEY_0: &str = "uDiMcWVNTuz//naQ88sOcN+E40CyBRGzGTT7OkoBS6M=";
	const KEY_1: &str = "VN8UXRVMNbIh9FWEFVde0q7GUA1SGOie1+FgAKlNYHc=";

	#[derive(Debug, Default)]
	struct User {
		encrypted_secret: Option<String>,
		secret_digest: Option<String>,
		encrypted_other_secret: Option<String>,
		keyring_id: Option<KeyId>,
	}

	fn registry(keys: &[(&str, &str)]) -> FieldRegistry<User> {
		let keyring = Keyring::with_options(keys.iter().copied(), &Options::default()).unwrap();

		FieldRegistry::new(keyring, |u: &User| u.keyring_id, |u, id| u.keyring_id = Some(id))
			.field(
				EncryptedField::new(
					"secret",
					|u: &User| u.encrypted_secret.as_deref(),
					|u, v| u.encrypted_secret = v,
				)
				.with_digest(|u, v| u.secret_digest = v),
			)
			.field(EncryptedField::new(
				"other_secret",
				|u: &User| u.encrypted_other_secret.as_deref(),
				|u, v| u.encrypted_other_secret = v,
			))
	}

	fn read(users: &FieldRegistry<User>, user: &User, field: &str) -> Option<String> {
		users
			.read(user, &mut FieldCache::new(), field)
			.unwrap()
			.map(|v| String::from_utf8(v).unwrap())
	}

	#[test]
	fn encrypts_value() {
		let users = registry(&[("0", KEY_0)]);
		let mut user = User::default();
		let mut cache = FieldCache::new();

		users
			.write(&mut user, &mut cache, "secret", Some("secret"))
			.unwrap();

		assert_eq!(Some("secret".to_string()), read(&users, &user, "secret"));
		assert!(user.encrypted_secret.is_some());
		assert_ne!(Some("secret"), user.encrypted_secret.as_deref());
		assert_eq!(
			Some("e5e9fa1ba31ecd1ae84f75caaa474f3a663f05f4"),
			user.secret_digest.as_deref()
		);
		assert_eq!(Some(KeyId::new(0)), user.keyring_id);
	}

	#[test]
	fn uninitialized_fields_are_none() {
		let users = registry(&[("0", KEY_0)]);

		assert_eq!(None, read(&users, &User::default(), "secret"));
	}

	#[test]
	fn empty_and_absent_values_clear_the_field() {
		let users = registry(&[("0", KEY_0)]);
		let mut user = User::default();
		let mut cache = FieldCache::new();

		users
			.write(&mut user, &mut cache, "secret", Some("42"))
			.unwrap();
		assert_eq!(
			Some(b"42".to_vec()),
			users.read(&user, &mut cache, "secret").unwrap()
		);

		users
			.write(&mut user, &mut cache, "secret", None::<&str>)
			.unwrap();
		assert_eq!(None, users.read(&user, &mut cache, "secret").unwrap());
		assert!(user.encrypted_secret.is_none());
		assert!(user.secret_digest.is_none());

		users
			.write(&mut user, &mut cache, "secret", Some("42"))
			.unwrap();
		users.write(&mut user, &mut cache, "secret", Some("")).unwrap();
		assert!(user.encrypted_secret.is_none());
		assert!(user.secret_digest.is_none());
	}

	#[test]
	fn unknown_field() {
		let users = registry(&[("0", KEY_0)]);
		let mut user = User::default();

		assert!(matches!(
			users.write(&mut user, &mut FieldCache::new(), "password", Some("x")),
			Err(Error::UnknownField(f)) if f == "password"
		));
	}

	#[test]
	fn writing_with_an_empty_keyring_fails() {
		let users = registry(&[]);
		let mut user = User::default();

		assert!(matches!(
			users.write(&mut user, &mut FieldCache::new(), "secret", Some("x")),
			Err(Error::EmptyKeyring)
		));
	}

	#[test]
	fn writes_stick_with_the_records_key_until_rotated() {
		let users = registry(&[("0", KEY_0)]);
		let mut user = User::default();
		let mut cache = FieldCache::new();

		users
			.write(&mut user, &mut cache, "secret", Some("42"))
			.unwrap();
		users
			.write(&mut user, &mut cache, "other_secret", Some("37"))
			.unwrap();

		users.keyring().add(1, KEY_1).unwrap();

		users
			.write(&mut user, &mut cache, "secret", Some("24"))
			.unwrap();
		assert_eq!(Some(KeyId::new(0)), user.keyring_id);

		// As happens on save
		users.rotate(&mut user, &mut cache).unwrap();

		assert_eq!(Some(KeyId::new(1)), user.keyring_id);
		assert_eq!(Some("24".to_string()), read(&users, &user, "secret"));
		assert_eq!(Some("37".to_string()), read(&users, &user, "other_secret"));
	}

	#[test]
	fn new_records_use_the_most_recent_key() {
		let users = registry(&[("0", KEY_0), ("1", KEY_1)]);
		let mut user = User::default();

		users
			.write(&mut user, &mut FieldCache::new(), "secret", Some("42"))
			.unwrap();

		assert_eq!(Some(KeyId::new(1)), user.keyring_id);
	}

	#[test]
	fn rotation_keeps_digests_and_skips_empty_fields() {
		let users = registry(&[("0", KEY_0)]);
		let mut user = User::default();
		let mut cache = FieldCache::new();

		users
			.write(&mut user, &mut cache, "secret", Some("42"))
			.unwrap();
		let old_ciphertext = user.encrypted_secret.clone();
		let old_digest = user.secret_digest.clone();

		users.keyring().add(1, KEY_1).unwrap();
		users.rotate(&mut user, &mut cache).unwrap();

		assert_ne!(old_ciphertext, user.encrypted_secret);
		assert_eq!(old_digest, user.secret_digest);
		assert!(user.encrypted_other_secret.is_none());
		assert_eq!(Some("42".to_string()), read(&users, &user, "secret"));
	}

	#[test]
	fn rotating_with_an_empty_keyring_does_nothing() {
		let users = registry(&[]);
		let mut user = User::default();

		users.rotate(&mut user, &mut FieldCache::new()).unwrap();
		assert!(user.keyring_id.is_none());
	}

	#[test]
	fn ciphertext_without_key_id_is_an_error() {
		let users = registry(&[("0", KEY_0)]);
		let user = User {
			encrypted_secret: Some("c29tZXRoaW5n".to_string()),
			..User::default()
		};

		assert!(matches!(
			users.read(&user, &mut FieldCache::new(), "secret"),
			Err(Error::InvalidKeyId(_))
		));
	}

	#[test]
	fn missing_key_is_an_error() {
		let users = registry(&[("0", KEY_0)]);
		let mut user = User::default();

		users
			.write(&mut user, &mut FieldCache::new(), "secret", Some("42"))
			.unwrap();

		users.keyring().clear();
		users.keyring().add(1, KEY_1).unwrap();

		assert!(matches!(
			users.read(&user, &mut FieldCache::new(), "secret"),
			Err(Error::UnknownKey(_))
		));
	}

	#[test]
	fn caches_decrypted_values() {
		let users = registry(&[("0", KEY_0)]);
		let mut user = User::default();
		let mut cache = FieldCache::new();

		users
			.write(&mut user, &mut cache, "secret", Some("42"))
			.unwrap();
		assert!(!cache.contains("secret"));
		users.read(&user, &mut cache, "secret").unwrap();
		assert!(cache.contains("secret"));

		// Mess with the stored ciphertext; the cache doesn't notice...
		user.encrypted_secret = Some("garbage".to_string());
		assert_eq!(
			Some(b"42".to_vec()),
			users.read(&user, &mut cache, "secret").unwrap()
		);

		// ... until the record is "reloaded"
		cache.clear();
		assert!(users.read(&user, &mut cache, "secret").is_err());
	}

	#[test]
	fn writing_invalidates_the_cache() {
		let users = registry(&[("0", KEY_0)]);
		let mut user = User::default();
		let mut cache = FieldCache::new();

		users
			.write(&mut user, &mut cache, "secret", Some("42"))
			.unwrap();
		users.read(&user, &mut cache, "secret").unwrap();

		users
			.write(&mut user, &mut cache, "secret", Some("37"))
			.unwrap();
		assert!(!cache.contains("secret"));
		assert_eq!(
			Some(b"37".to_vec()),
			users.read(&user, &mut cache, "secret").unwrap()
		);
	}

	#[test]
	fn debug_output_has_no_plaintext() {
		let users = registry(&[("0", KEY_0)]);
		let mut user = User::default();
		let mut cache = FieldCache::new();

		users
			.write(&mut user, &mut cache, "secret", Some("hunter2"))
			.unwrap();
		users.read(&user, &mut cache, "secret").unwrap();

		assert_eq!("{\"secret\"}", format!("{cache:?}"));
		assert!(!format!("{users:?}").contains("hunter2"));
	}
}
