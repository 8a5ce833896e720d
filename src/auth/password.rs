use argon2::{
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use rand::rngs::OsRng;
use tracing::error;

pub fn hash_password(plain: &str) -> anyhow::Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    let argon2 = Argon2::default();
    let hash = argon2
        .hash_password(plain.as_bytes(), &salt)
        .map_err(|e| {
            error!(error = %e, "argon2 hash_password error");
            anyhow::anyhow!(e.to_string())
        })?
        .to_string();
    Ok(hash)
}

/// Verifies a plaintext against a stored PHC hash. A malformed stored hash is
/// an anomaly worth logging but never an error to the caller: it reads as a
/// failed match.
pub fn verify_password(plain: &str, hash: &str) -> bool {
    let parsed = match PasswordHash::new(hash) {
        Ok(p) => p,
        Err(e) => {
            error!(error = %e, "stored password hash is malformed");
            return false;
        }
    };
    Argon2::default()
        .verify_password(plain.as_bytes(), &parsed)
        .is_ok()
}

const SYMBOLS: &str = "!@#$%^&*()_+-=[]{};':\"\\|,.<>/?`~";

#[derive(Debug, Clone)]
pub struct PolicyReport {
    pub is_valid: bool,
    pub errors: Vec<String>,
}

/// Strength rules for new passwords, each checked independently so the
/// caller gets every failing rule at once. The same policy applies to
/// signup, reset, and password change.
pub fn evaluate(candidate: &str) -> PolicyReport {
    let mut errors = Vec::new();
    if candidate.chars().count() < 8 {
        errors.push("Password must be at least 8 characters long".to_string());
    }
    if !candidate.chars().any(|c| c.is_ascii_uppercase()) {
        errors.push("Password must contain at least one uppercase letter".to_string());
    }
    if !candidate.chars().any(|c| c.is_ascii_digit()) {
        errors.push("Password must contain at least one number".to_string());
    }
    if !candidate.chars().any(|c| SYMBOLS.contains(c)) {
        errors.push("Password must contain at least one special character".to_string());
    }
    PolicyReport {
        is_valid: errors.is_empty(),
        errors,
    }
}


#[cfg(test)]
mod policy_tests {
    use super::*;

    #[test]
    fn accepts_strong_password() {
        let report = evaluate("Password123!");
        assert!(report.is_valid);
        assert!(report.errors.is_empty());
    }

    #[test]
    fn reports_every_failing_rule() {
        let report = evaluate("abc");
        assert!(!report.is_valid);
        assert_eq!(report.errors.len(), 4);
    }

    #[test]
    fn reports_exactly_the_failing_rules() {
        // Long enough and has a digit, but no uppercase and no symbol.
        let report = evaluate("abcdefg1");
        assert_eq!(
            report.errors,
            vec![
                "Password must contain at least one uppercase letter".to_string(),
                "Password must contain at least one special character".to_string(),
            ]
        );
    }

    #[test]
    fn length_and_symbol_failures_only() {
        let report = evaluate("Abc1");
        assert_eq!(
            report.errors,
            vec![
                "Password must be at least 8 characters long".to_string(),
                "Password must contain at least one special character".to_string(),
            ]
        );
    }
}
