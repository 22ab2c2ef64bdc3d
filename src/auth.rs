use argon2::{Argon2, PasswordHash, PasswordVerifier};
use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use rand::{RngCore, rngs::OsRng};
use sha2::{Digest, Sha256};

/// Checks `password` against an Argon2 PHC string from `dcms_user.password_hash`.
pub fn verify_password(password: &str, stored_hash: &str) -> bool {
    let Ok(parsed) = PasswordHash::new(stored_hash) else {
        return false;
    };
    Argon2::default()
        .verify_password(password.as_bytes(), &parsed)
        .is_ok()
}

/// Opaque bearer token handed to the client. Only its hash is stored.
pub fn generate_access_token() -> String {
    let mut bytes = [0u8; 32];
    OsRng.fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// SHA-256 hex, as stored in `session_token.session_token_hash`.
pub fn hash_access_token(token: &str) -> String {
    hex::encode(Sha256::digest(token.as_bytes()))
}

#[cfg(test)]
mod tests {
    use argon2::PasswordHasher;
    use argon2::password_hash::{SaltString, rand_core::OsRng as SaltRng};

    use super::*;

    #[test]
    fn password_round_trip() {
        let salt = SaltString::generate(&mut SaltRng);
        let phc = Argon2::default()
            .hash_password(b"molar-42", &salt)
            .unwrap()
            .to_string();

        assert!(verify_password("molar-42", &phc));
        assert!(!verify_password("molar-43", &phc));
        assert!(!verify_password("molar-42", "not-a-phc-string"));
    }

    #[test]
    fn tokens_are_unique_and_hashed_to_hex() {
        let a = generate_access_token();
        let b = generate_access_token();
        assert_ne!(a, b);

        let h = hash_access_token(&a);
        assert_eq!(h.len(), 64);
        assert_eq!(h, hash_access_token(&a));
        assert!(h.chars().all(|c| c.is_ascii_hexdigit()));
    }
}
