//! Field-level encryption at rest, with keys you can rotate without a flag day.
//!
//! If you've got a few sensitive columns in a database (email addresses, API tokens, that sort
//! of thing) and you'd like them encrypted, but you'd *also* like to be able to change the key
//! one day without re-encrypting everything in one go, then this is for you.
//!
//! A [`Keyring`] holds any number of keys, each with a numeric ID.  It encrypts with the key
//! with the highest ID, and tells you which ID that was; you store the ID next to the
//! ciphertext, and hand it back when it's time to decrypt.  To rotate, add a key with a higher
//! ID, and re-encrypt old values whenever it suits you (every time a record is saved is usually
//! a good time).  Old keys stay in the keyring until nothing needs them.
//!
//! Every encryption also returns a *digest* of the plaintext.  The digest doesn't depend on the
//! key, so it survives rotation, and lets you find a record by an encrypted value without
//! decrypting the whole table.
//!
//! How the encrypting actually happens is up to the [`Encryptor`].  The default is AES-128-CBC
//! with an HMAC-SHA256 (see [`AesCbc`]); [`AesGcm`] is there for those that want an AEAD
//! mode, and [`Algorithm`] lists everything that comes in the box.
//!
//! If you're wiring encrypted fields into records, a [`FieldRegistry`] takes care of keeping
//! ciphertexts, digests, and key IDs in step.
mod cbc_encryptor;
mod digest;
mod encryptor;
mod error;
mod fields;
mod gcm_encryptor;
mod key;
mod key_id;
mod keyring;
mod options;

pub use cbc_encryptor::AesCbc;
pub use digest::{DigestAlgorithm, Digester};
pub use encryptor::Encryptor;
pub use error::Error;
pub use fields::{EncryptedField, FieldCache, FieldRegistry};
pub use gcm_encryptor::AesGcm;
pub use key::{Key, generate_secret};
pub use key_id::{IntoKeyId, KeyId};
pub use keyring::{Encrypted, Keyring};
pub use options::{Algorithm, Options};
