//! Password hashing for local users

/// Default bcrypt cost factor
pub const BCRYPT_COST: u32 = 12;

/// Hash a password with bcrypt
pub fn hash_password(password: &str, cost: u32) -> Result<String, bcrypt::BcryptError> {
    bcrypt::hash(password, cost)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_password_hash_verifies() {
        let password = "correct horse battery staple";
        let hash = hash_password(password, 4).unwrap();

        assert_ne!(hash, password);
        assert!(bcrypt::verify(password, &hash).unwrap());
        assert!(!bcrypt::verify("wrong password", &hash).unwrap());
    }

    #[test]
    fn test_invalid_cost_is_an_error() {
        assert!(hash_password("secret", 99).is_err());
    }
}
