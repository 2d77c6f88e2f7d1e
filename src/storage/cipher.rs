//! Transparent page encryption.
//!
//! Pages are encrypted with AES-256, one 16-byte block at a time and without
//! padding (a page is an exact multiple of the block size). The key is
//! derived from the password with PBKDF2-HMAC-SHA256 over the salt stored in
//! the file header.

use std::fmt;

use aes::cipher::generic_array::GenericArray;
use aes::cipher::{BlockDecrypt, BlockEncrypt, KeyInit};
use aes::Aes256;
use rand::RngCore;
use sha2::Sha256;

use super::file_header::ENCRYPTION_SALT_SIZE;

const BLOCK_SIZE: usize = 16;

/// Known plaintext encrypted into the header to validate passwords.
const PASSWORD_CHECK: &[u8; BLOCK_SIZE] = b"quillstore-check";

pub struct PageCipher {
    cipher: Aes256,
}

impl PageCipher {
    /// Derive the page key from `password` and `salt`.
    pub fn new(password: &str, salt: &[u8; ENCRYPTION_SALT_SIZE], rounds: u32) -> Self {
        let mut key = [0u8; 32];
        pbkdf2::pbkdf2_hmac::<Sha256>(password.as_bytes(), salt, rounds, &mut key);

        Self {
            cipher: Aes256::new(GenericArray::from_slice(&key)),
        }
    }

    /// Fresh random salt for a new encrypted file.
    pub fn new_salt() -> [u8; ENCRYPTION_SALT_SIZE] {
        let mut salt = [0u8; ENCRYPTION_SALT_SIZE];
        rand::thread_rng().fill_bytes(&mut salt);
        salt
    }

    /// Encrypt `data` in place.
    ///
    /// # Panics
    /// Panics if `data.len()` is not a multiple of 16.
    pub fn encrypt(&self, data: &mut [u8]) {
        assert_eq!(data.len() % BLOCK_SIZE, 0, "unaligned cipher input");
        for block in data.chunks_exact_mut(BLOCK_SIZE) {
            self.cipher.encrypt_block(GenericArray::from_mut_slice(block));
        }
    }

    /// Decrypt `data` in place.
    ///
    /// # Panics
    /// Panics if `data.len()` is not a multiple of 16.
    pub fn decrypt(&self, data: &mut [u8]) {
        assert_eq!(data.len() % BLOCK_SIZE, 0, "unaligned cipher input");
        for block in data.chunks_exact_mut(BLOCK_SIZE) {
            self.cipher.decrypt_block(GenericArray::from_mut_slice(block));
        }
    }

    /// Block stored in the header so a wrong password is detected on open.
    pub fn password_check(&self) -> [u8; BLOCK_SIZE] {
        let mut block = *PASSWORD_CHECK;
        self.encrypt(&mut block);
        block
    }

    pub fn verify(&self, check: &[u8; BLOCK_SIZE]) -> bool {
        let mut block = *check;
        self.decrypt(&mut block);
        &block == PASSWORD_CHECK
    }
}

impl fmt::Debug for PageCipher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("PageCipher(AES-256)")
    }
}
