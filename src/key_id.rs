use serde::{Deserialize, Serialize};

use super::Error;

/// The identifier of a [`Key`](super::Key) within a [`Keyring`](super::Keyring).
///
/// Store this alongside every ciphertext, because it's the only way to know which key
/// to ask for when the time comes to decrypt.
#[derive(Clone, Copy, Debug, Default, Hash, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
#[repr(transparent)]
pub struct KeyId(u64);

impl KeyId {
	pub const fn new(id: u64) -> Self {
		Self(id)
	}

	pub const fn get(self) -> u64 {
		self.0
	}
}

impl From<u64> for KeyId {
	fn from(id: u64) -> Self {
		Self(id)
	}
}

impl From<KeyId> for u64 {
	fn from(id: KeyId) -> Self {
		id.0
	}
}

impl std::fmt::Display for KeyId {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.write_fmt(format_args!("{}", self.0))
	}
}

impl std::str::FromStr for KeyId {
	type Err = Error;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		let trimmed = s.trim();

		// u64's parser will happily take a leading '+', which nobody means in a key ID
		if trimmed.is_empty() || !trimmed.bytes().all(|b| b.is_ascii_digit()) {
			return Err(Error::invalid_key_id(s));
		}

		trimmed
			.parse::<u64>()
			.map(Self)
			.map_err(|_| Error::invalid_key_id(s))
	}
}

/// Anything that can be coerced into a [`KeyId`].
///
/// Key IDs tend to arrive from all sorts of places -- configuration files, environment
/// variables, database columns -- so integers of any width and integer-like strings are all
/// accepted.  Negative numbers and non-numeric strings are rejected with
/// [`Error::InvalidKeyId`].
pub trait IntoKeyId {
	fn into_key_id(self) -> Result<KeyId, Error>;
}

impl IntoKeyId for KeyId {
	fn into_key_id(self) -> Result<KeyId, Error> {
		Ok(self)
	}
}

impl IntoKeyId for &KeyId {
	fn into_key_id(self) -> Result<KeyId, Error> {
		Ok(*self)
	}
}

macro_rules! unsigned_key_id {
	($($t:ty),*) => {
		$(
			impl IntoKeyId for $t {
				fn into_key_id(self) -> Result<KeyId, Error> {
					Ok(KeyId(self as u64))
				}
			}
		)*
	};
}

macro_rules! signed_key_id {
	($($t:ty),*) => {
		$(
			impl IntoKeyId for $t {
				fn into_key_id(self) -> Result<KeyId, Error> {
					u64::try_from(self)
						.map(KeyId)
						.map_err(|_| Error::invalid_key_id(self.to_string()))
				}
			}
		)*
	};
}

unsigned_key_id!(u8, u16, u32, u64, usize);
signed_key_id!(i8, i16, i32, i64, isize);

impl IntoKeyId for &str {
	fn into_key_id(self) -> Result<KeyId, Error> {
		self.parse()
	}
}

impl IntoKeyId for String {
	fn into_key_id(self) -> Result<KeyId, Error> {
		self.parse()
	}
}

impl IntoKeyId for &String {
	fn into_key_id(self) -> Result<KeyId, Error> {
		self.parse()
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn integers_coerce() {
		assert_eq!(KeyId(0), 0u8.into_key_id().unwrap());
		assert_eq!(KeyId(42), 42u64.into_key_id().unwrap());
		assert_eq!(KeyId(42), 42i32.into_key_id().unwrap());
	}

	#[test]
	fn negative_integers_are_rejected() {
		assert!(matches!(
			(-1i64).into_key_id(),
			Err(Error::InvalidKeyId(s)) if s == "-1"
		));
	}

	#[test]
	fn strings_coerce() {
		assert_eq!(KeyId(0), "0".into_key_id().unwrap());
		assert_eq!(KeyId(1234), " 1234\n".into_key_id().unwrap());
		assert_eq!(KeyId(7), String::from("7").into_key_id().unwrap());
	}

	#[test]
	fn junk_strings_are_rejected() {
		for junk in ["", "  ", "one", "1.5", "-3", "+3", "0x10"] {
			assert!(
				matches!(junk.into_key_id(), Err(Error::InvalidKeyId(_))),
				"{junk:?} should not be a valid key ID"
			);
		}
	}

	#[test]
	fn display_is_plain_integer() {
		assert_eq!("31337", KeyId(31337).to_string());
	}
}
