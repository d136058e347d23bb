//! Invitation token generation

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use rand::rngs::OsRng;
use rand::RngCore;

/// Random bytes per token.
pub const TOKEN_BYTES: usize = 32;

/// Encoded token length: 32 bytes in unpadded URL-safe base64.
pub const TOKEN_LENGTH: usize = 43;

/// Generate an invitation token.
///
/// 256 bits from the operating system RNG, URL-safe base64 without padding,
/// so every token is exactly [`TOKEN_LENGTH`] characters and can travel in a
/// link unescaped. Collisions are left to the repository's unique constraint.
///
/// # Examples
///
/// ```
/// use org_engine::token::{generate_token, TOKEN_LENGTH};
///
/// let token = generate_token();
/// assert_eq!(token.len(), TOKEN_LENGTH);
/// ```
pub fn generate_token() -> String {
    let mut bytes = [0u8; TOKEN_BYTES];
    OsRng.fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}
