use std::borrow::Cow;
use std::fmt;

use base64::{engine::general_purpose::STANDARD as Base64, Engine};
use hmac::{digest::InvalidLength, Hmac, Mac};
use pbkdf2::pbkdf2;
use sha1::{Digest, Sha1 as Sha1_hash};
use sha2::{Sha256 as Sha256_hash, Sha512 as Sha512_hash};

use crate::common::Password;

/// Generate a nonce for SCRAM authentication.
pub fn generate_nonce() -> Result<String, getrandom::Error> {
    let mut data = [0u8; 24];
    getrandom::getrandom(&mut data)?;
    Ok(Base64.encode(data))
}

/// Escapes a name for use in `n=` or `a=`, replacing `=` and `,`.
pub fn escape_name(name: &str) -> Cow<'_, str> {
    if name.contains(|c: char| c == '=' || c == ',') {
        Cow::Owned(name.replace('=', "=3D").replace(',', "=2C"))
    } else {
        Cow::Borrowed(name)
    }
}

/// Errors while deriving the salted password.
#[derive(Debug, PartialEq)]
pub enum DeriveError {
    /// A pre-derived password was made with another hash (stored, requested).
    IncompatibleHashingMethod(String, String),
    /// A pre-derived password was made with another salt.
    IncorrectSalt,
    /// A pre-derived password was made with another iteration count (stored, requested).
    IncompatibleIterationCount(u32, u32),
    /// The password failed SASLprep.
    InvalidPassword,
    /// The HMAC key had an unusable length.
    InvalidLength,
}

impl fmt::Display for DeriveError {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        match self {
            DeriveError::IncompatibleHashingMethod(one, two) => {
                write!(fmt, "incompatible hashing method, {} is not {}", one, two)
            }
            DeriveError::IncorrectSalt => write!(fmt, "incorrect salt"),
            DeriveError::IncompatibleIterationCount(one, two) => {
                write!(fmt, "incompatible iteration count, {} is not {}", one, two)
            }
            DeriveError::InvalidPassword => write!(fmt, "password rejected by SASLprep"),
            DeriveError::InvalidLength => write!(fmt, "invalid derived key length"),
        }
    }
}

impl std::error::Error for DeriveError {}

impl From<InvalidLength> for DeriveError {
    fn from(_err: InvalidLength) -> DeriveError {
        DeriveError::InvalidLength
    }
}

/// A trait which defines the needed methods for SCRAM.
pub trait ScramProvider {
    /// The name of the hash function.
    fn name() -> &'static str;

    /// A function which hashes the data using the hash function.
    fn hash(data: &[u8]) -> Vec<u8>;

    /// A function which performs an HMAC using the hash function.
    fn hmac(data: &[u8], key: &[u8]) -> Result<Vec<u8>, InvalidLength>;

    /// A function which does PBKDF2 key derivation using the hash function.
    fn derive(data: &Password, salt: &[u8], iterations: u32) -> Result<Vec<u8>, DeriveError>;
}

/// Returns the already salted password if it was derived with the same parameters.
fn reuse_derived(
    name: &str,
    password: &Password,
    salt: &[u8],
    iterations: u32,
) -> Result<Option<Vec<u8>>, DeriveError> {
    match password {
        Password::Plain(_) => Ok(None),
        Password::Pbkdf2 {
            method,
            salt: my_salt,
            iterations: my_iterations,
            data,
        } => {
            if method != name {
                Err(DeriveError::IncompatibleHashingMethod(
                    method.to_string(),
                    name.to_string(),
                ))
            } else if my_salt != salt {
                Err(DeriveError::IncorrectSalt)
            } else if *my_iterations != iterations {
                Err(DeriveError::IncompatibleIterationCount(
                    *my_iterations,
                    iterations,
                ))
            } else {
                Ok(Some(data.to_vec()))
            }
        }
    }
}

fn prepare(password: &Password) -> Result<Cow<'_, str>, DeriveError> {
    match password {
        Password::Plain(plain) => {
            stringprep::saslprep(plain).map_err(|_| DeriveError::InvalidPassword)
        }
        Password::Pbkdf2 { .. } => Err(DeriveError::InvalidPassword),
    }
}

macro_rules! impl_scram_provider {
    ($(#[$meta:meta])* $name:ident, $hash:ty, $label:expr, $len:expr) => {
        $(#[$meta])*
        pub struct $name;

        impl ScramProvider for $name {
            fn name() -> &'static str {
                $label
            }

            fn hash(data: &[u8]) -> Vec<u8> {
                <$hash>::digest(data).to_vec()
            }

            fn hmac(data: &[u8], key: &[u8]) -> Result<Vec<u8>, InvalidLength> {
                let mut mac = <Hmac<$hash> as Mac>::new_from_slice(key)?;
                mac.update(data);
                Ok(mac.finalize().into_bytes().to_vec())
            }

            fn derive(
                password: &Password,
                salt: &[u8],
                iterations: u32,
            ) -> Result<Vec<u8>, DeriveError> {
                if let Some(data) = reuse_derived(Self::name(), password, salt, iterations)? {
                    return Ok(data);
                }
                let plain = prepare(password)?;
                let mut result = vec![0; $len];
                pbkdf2::<Hmac<$hash>>(plain.as_bytes(), salt, iterations, &mut result)?;
                Ok(result)
            }
        }
    };
}

impl_scram_provider!(
    /// A `ScramProvider` which provides SCRAM-SHA-1 and SCRAM-SHA-1-PLUS
    Sha1,
    Sha1_hash,
    "SHA-1",
    20
);

impl_scram_provider!(
    /// A `ScramProvider` which provides SCRAM-SHA-256 and SCRAM-SHA-256-PLUS
    Sha256,
    Sha256_hash,
    "SHA-256",
    32
);

impl_scram_provider!(
    /// A `ScramProvider` which provides SCRAM-SHA-512 and SCRAM-SHA-512-PLUS
    Sha512,
    Sha512_hash,
    "SHA-512",
    64
);
