//! Passphrase handling for encrypted client keys.

use std::fmt;
use std::fs;
use std::path::Path;
use std::sync::Arc;

use pkcs8::der::Document;
use pkcs8::EncryptedPrivateKeyInfo;
use rustls::pki_types::{PrivateKeyDer, PrivatePkcs8KeyDer};
use zeroize::Zeroizing;

use crate::Error;

/// Asks the user for the passphrase of an encrypted key.
///
/// Receives the key path and the attempt number (starting at 1); `None` aborts.
pub type PasswordCallback = Arc<dyn Fn(&Path, u32) -> Option<String> + Send + Sync>;

/// A passphrase cache scoped to one session.
///
/// Holds the last passphrase that decrypted the client key, so a second handshake on the
/// same session (after STARTTLS, say) does not prompt again.
pub struct PasswordCache {
    callback: Option<PasswordCallback>,
    cached: Option<Zeroizing<String>>,
}

impl fmt::Debug for PasswordCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PasswordCache")
            .field("callback", &self.callback.is_some())
            .field("cached", &self.cached.is_some())
            .finish()
    }
}

impl Default for PasswordCache {
    fn default() -> Self {
        PasswordCache::new(None)
    }
}

impl PasswordCache {
    /// Creates an empty cache.
    pub fn new(callback: Option<PasswordCallback>) -> PasswordCache {
        PasswordCache {
            callback,
            cached: None,
        }
    }

    /// Replaces the prompt callback. The cached passphrase is kept.
    pub fn set_callback(&mut self, callback: Option<PasswordCallback>) {
        self.callback = callback;
    }

    /// Whether a passphrase is cached.
    pub fn is_cached(&self) -> bool {
        self.cached.is_some()
    }

    /// The cached passphrase, or a fresh one from the callback.
    pub fn passphrase(&mut self, key: &Path, attempt: u32) -> Option<Zeroizing<String>> {
        if let Some(cached) = &self.cached {
            return Some(cached.clone());
        }
        let callback = self.callback.as_ref()?;
        let pass = Zeroizing::new(callback(key, attempt)?);
        self.cached = Some(pass.clone());
        Some(pass)
    }

    /// Forgets the cached passphrase.
    pub fn invalidate(&mut self) {
        if self.cached.take().is_some() {
            log::debug!("Passphrase cache invalidated");
        }
    }
}

/// Loads a client private key from a PEM or DER file, decrypting PKCS#8 keys with a
/// passphrase from `cache`.
pub(crate) fn load_private_key(
    path: &Path,
    cache: &mut PasswordCache,
    retries: u32,
) -> Result<PrivateKeyDer<'static>, Error> {
    let data = Zeroizing::new(fs::read(path)?);

    if let Some(key) = rustls_pemfile::private_key(&mut &data[..])? {
        return Ok(key);
    }

    let document = match std::str::from_utf8(&data) {
        Ok(text) if text.contains("-----BEGIN") => {
            let (label, document) = Document::from_pem(text)
                .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))?;
            if label != "ENCRYPTED PRIVATE KEY" {
                return Err(Error::Config(format!(
                    "{}: unsupported key type {}",
                    path.display(),
                    label
                )));
            }
            document
        }
        _ => Document::try_from(&data[..])
            .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))?,
    };

    let encrypted = match EncryptedPrivateKeyInfo::try_from(document.as_bytes()) {
        Ok(encrypted) => encrypted,
        // Plain PKCS#8 in DER form.
        Err(_) => {
            return Ok(PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(
                document.as_bytes().to_vec(),
            )))
        }
    };

    for attempt in 1..=retries.max(1) {
        let pass = cache.passphrase(path, attempt).ok_or_else(|| {
            Error::Config(format!("{}: no passphrase for encrypted key", path.display()))
        })?;
        match encrypted.decrypt(pass.as_bytes()) {
            Ok(secret) => {
                return Ok(PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(
                    secret.as_bytes().to_vec(),
                )))
            }
            Err(e) => {
                log::debug!("Failed to decrypt {} (attempt {attempt}): {e}", path.display());
                cache.invalidate();
            }
        }
    }
    Err(Error::Config(format!(
        "{}: wrong passphrase for encrypted key",
        path.display()
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pkcs8::pkcs5::pbes2;
    use pkcs8::PrivateKeyInfo;
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn temp_file(name: &str, data: &[u8]) -> PathBuf {
        let path = std::env::temp_dir().join(format!(
            "xmpp-transport-{}-{}",
            std::process::id(),
            name
        ));
        fs::write(&path, data).unwrap();
        path
    }

    fn encrypted_key(password: &str) -> (Vec<u8>, Vec<u8>) {
        let key_pair = rcgen::KeyPair::generate().unwrap();
        let plain = key_pair.serialize_der();
        let salt = [7u8; 16];
        let iv = [9u8; 16];
        let params = pbes2::Parameters::pbkdf2_sha256_aes256cbc(1000, &salt, &iv).unwrap();
        let encrypted = PrivateKeyInfo::try_from(plain.as_slice())
            .unwrap()
            .encrypt_with_params(params, password)
            .unwrap();
        (plain, encrypted.as_bytes().to_vec())
    }

    fn counting_callback(answers: Vec<&'static str>) -> (PasswordCallback, Arc<AtomicU32>) {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let callback: PasswordCallback = Arc::new(move |_, attempt| {
            counter.fetch_add(1, Ordering::SeqCst);
            answers.get(attempt as usize - 1).map(|s| s.to_string())
        });
        (callback, calls)
    }

    #[test]
    fn cache_is_reused() {
        let (callback, calls) = counting_callback(vec!["hunter2"]);
        let mut cache = PasswordCache::new(Some(callback));
        assert!(!cache.is_cached());
        assert_eq!(cache.passphrase(Path::new("key"), 1).unwrap().as_str(), "hunter2");
        assert!(cache.is_cached());
        assert_eq!(cache.passphrase(Path::new("key"), 1).unwrap().as_str(), "hunter2");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        cache.invalidate();
        assert!(!cache.is_cached());
    }

    #[test]
    fn no_callback_no_passphrase() {
        let mut cache = PasswordCache::default();
        assert!(cache.passphrase(Path::new("key"), 1).is_none());
    }

    #[test]
    fn decrypts_encrypted_key() {
        let (plain, encrypted) = encrypted_key("hunter2");
        let path = temp_file("decrypt.der", &encrypted);
        let (callback, calls) = counting_callback(vec!["hunter2"]);
        let mut cache = PasswordCache::new(Some(callback));

        let key = load_private_key(&path, &mut cache, 1).unwrap();
        assert_eq!(key.secret_der(), plain.as_slice());
        assert!(cache.is_cached());

        // A second handshake on the same session does not prompt again.
        load_private_key(&path, &mut cache, 1).unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        fs::remove_file(path).unwrap();
    }

    #[test]
    fn retries_after_wrong_passphrase() {
        let (_, encrypted) = encrypted_key("hunter2");
        let path = temp_file("retry.der", &encrypted);

        let (callback, _) = counting_callback(vec!["wrong", "hunter2"]);
        let mut cache = PasswordCache::new(Some(callback));
        assert!(load_private_key(&path, &mut cache, 1).is_err());
        assert!(!cache.is_cached());

        let (callback, calls) = counting_callback(vec!["wrong", "hunter2"]);
        let mut cache = PasswordCache::new(Some(callback));
        load_private_key(&path, &mut cache, 2).unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        fs::remove_file(path).unwrap();
    }

    #[test]
    fn plain_pem_key() {
        let key_pair = rcgen::KeyPair::generate().unwrap();
        let path = temp_file("plain.pem", key_pair.serialize_pem().as_bytes());
        let mut cache = PasswordCache::default();
        let key = load_private_key(&path, &mut cache, 1).unwrap();
        assert_eq!(key.secret_der(), key_pair.serialize_der().as_slice());
        assert!(!cache.is_cached());
        fs::remove_file(path).unwrap();
    }
}
