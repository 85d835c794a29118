// Encryption Service
// AES-256-GCM for stream keys, relay credentials and channel exports

use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Nonce,
};
use argon2::{Algorithm, Argon2, Params, Version};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use rand::Rng;
use std::path::Path;
use zeroize::{Zeroize, Zeroizing};

const SALT_LEN: usize = 32;
const NONCE_LEN: usize = 12;
const KEY_LEN: usize = 32;

const MACHINE_KEY_FILE: &str = ".stream_key";

// Prefix marking secrets encrypted with the machine key
const SECRET_PREFIX: &str = "ENC::";

type Key = Zeroizing<[u8; KEY_LEN]>;

pub struct Encryption;

impl Encryption {
    /// Encrypt data with a password (salt + nonce + ciphertext)
    pub fn encrypt(data: &[u8], password: &str) -> Result<Vec<u8>, String> {
        let mut rng = rand::thread_rng();
        let salt: [u8; SALT_LEN] = rng.gen();
        let key = Self::derive_key(password, &salt)?;

        let sealed = Self::seal(&key, data)?;

        let mut result = Vec::with_capacity(SALT_LEN + sealed.len());
        result.extend_from_slice(&salt);
        result.extend_from_slice(&sealed);
        Ok(result)
    }

    /// Decrypt data produced by [`Encryption::encrypt`]
    pub fn decrypt(encrypted: &[u8], password: &str) -> Result<Vec<u8>, String> {
        if encrypted.len() < SALT_LEN + NONCE_LEN {
            return Err("Invalid encrypted data".to_string());
        }

        let (salt, sealed) = encrypted.split_at(SALT_LEN);
        let key = Self::derive_key(password, salt)?;
        Self::open(&key, sealed)
    }

    /// Argon2id, 64 MB memory, 3 iterations, 4 lanes
    fn derive_key(password: &str, salt: &[u8]) -> Result<Key, String> {
        let mut key = Zeroizing::new([0u8; KEY_LEN]);

        let params = Params::new(65536, 3, 4, None)
            .map_err(|e| format!("Failed to create Argon2 params: {e}"))?;

        Argon2::new(Algorithm::Argon2id, Version::V0x13, params)
            .hash_password_into(password.as_bytes(), salt, &mut *key)
            .map_err(|e| format!("Key derivation failed: {e}"))?;

        Ok(key)
    }

    /// nonce + ciphertext
    fn seal(key: &Key, plaintext: &[u8]) -> Result<Vec<u8>, String> {
        let nonce_bytes: [u8; NONCE_LEN] = rand::thread_rng().gen();
        let cipher = Aes256Gcm::new_from_slice(&**key)
            .map_err(|e| format!("Failed to create cipher: {e}"))?;

        let ciphertext = cipher
            .encrypt(Nonce::from_slice(&nonce_bytes), plaintext)
            .map_err(|e| format!("Encryption failed: {e}"))?;

        let mut combined = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        combined.extend_from_slice(&nonce_bytes);
        combined.extend_from_slice(&ciphertext);
        Ok(combined)
    }

    fn open(key: &Key, sealed: &[u8]) -> Result<Vec<u8>, String> {
        if sealed.len() < NONCE_LEN {
            return Err("Invalid encrypted data".to_string());
        }
        let (nonce_bytes, ciphertext) = sealed.split_at(NONCE_LEN);
        let cipher = Aes256Gcm::new_from_slice(&**key)
            .map_err(|e| format!("Failed to create cipher: {e}"))?;

        cipher
            .decrypt(Nonce::from_slice(nonce_bytes), ciphertext)
            .map_err(|e| format!("Decryption failed: {e}"))
    }

    /// Load the machine key from the data directory, creating it on first use
    fn machine_key(app_data_dir: &Path) -> Result<Key, String> {
        let key_file = app_data_dir.join(MACHINE_KEY_FILE);

        let key = if key_file.exists() {
            let mut key_data = std::fs::read(&key_file)
                .map_err(|e| format!("Failed to read machine key: {e}"))?;

            if key_data.len() != KEY_LEN {
                key_data.zeroize();
                return Err("Invalid machine key file".to_string());
            }

            let mut key = Zeroizing::new([0u8; KEY_LEN]);
            key.copy_from_slice(&key_data);
            key_data.zeroize();
            key
        } else {
            std::fs::create_dir_all(app_data_dir)
                .map_err(|e| format!("Failed to create data directory: {e}"))?;

            let key = Zeroizing::new(rand::thread_rng().gen::<[u8; KEY_LEN]>());
            std::fs::write(&key_file, *key)
                .map_err(|e| format!("Failed to save machine key: {e}"))?;
            log::info!("Generated new machine key");
            key
        };

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&key_file, std::fs::Permissions::from_mode(0o600))
                .map_err(|e| format!("Failed to set key file permissions: {e}"))?;
        }

        Ok(key)
    }

    /// Encrypt a secret (stream key, relay password) for storage.
    /// Empty and already encrypted values pass through unchanged.
    pub fn encrypt_secret(secret: &str, app_data_dir: &Path) -> Result<String, String> {
        if secret.is_empty() || Self::is_encrypted(secret) {
            return Ok(secret.to_string());
        }

        let key = Self::machine_key(app_data_dir)?;
        let sealed = Self::seal(&key, secret.as_bytes())?;
        Ok(format!("{SECRET_PREFIX}{}", BASE64.encode(sealed)))
    }

    /// Decrypt a stored secret; plaintext values pass through unchanged
    pub fn decrypt_secret(stored: &str, app_data_dir: &Path) -> Result<String, String> {
        let Some(encoded) = stored.strip_prefix(SECRET_PREFIX) else {
            return Ok(stored.to_string());
        };

        let key = Self::machine_key(app_data_dir)?;
        let mut sealed = BASE64
            .decode(encoded)
            .map_err(|e| format!("Failed to decode encrypted secret: {e}"))?;

        let opened = Self::open(&key, &sealed);
        sealed.zeroize();
        let mut plaintext = opened?;

        let result = String::from_utf8(plaintext.clone())
            .map_err(|e| format!("Invalid UTF-8 in decrypted secret: {e}"));
        plaintext.zeroize();
        result
    }

    pub fn is_encrypted(value: &str) -> bool {
        value.starts_with(SECRET_PREFIX)
    }
}
