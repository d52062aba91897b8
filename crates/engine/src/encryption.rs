//! Encryption tool seam
//!
//! Source files carrying the `encrypted_` attribute are decrypted through
//! this trait. Concrete tools (age, gpg, …) live outside the engine; the
//! engine only needs the two operations below plus a null implementation
//! for unencrypted source trees.

use crate::error::Result;

/// Encrypts and decrypts file contents
pub trait EncryptionTool {
    /// Encrypt `plaintext`
    fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>>;

    /// Decrypt `ciphertext`
    ///
    /// `filename_hint` names the source file for error messages and for
    /// tools that key decryption parameters off the file name.
    fn decrypt(&self, filename_hint: &str, ciphertext: &[u8]) -> Result<Vec<u8>>;
}

/// An encryption tool that passes contents through unchanged
///
/// Used when the source tree contains no encrypted entries.
#[derive(Debug, Default)]
pub struct NullEncryptionTool;

impl EncryptionTool for NullEncryptionTool {
    fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>> {
        Ok(plaintext.to_vec())
    }

    fn decrypt(&self, _filename_hint: &str, ciphertext: &[u8]) -> Result<Vec<u8>> {
        Ok(ciphertext.to_vec())
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::panic)]
    use super::*;

    #[test]
    fn test_null_tool_is_identity() {
        let tool = NullEncryptionTool;
        assert_eq!(tool.encrypt(b"secret").unwrap(), b"secret");
        assert_eq!(tool.decrypt("f", b"secret").unwrap(), b"secret");
    }
}
