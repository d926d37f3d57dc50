//! Credential lookup for the generation service
//!
//! The variable name comes from `[generation] api_key_env`, so one binary can
//! talk to Anthropic (`ANTHROPIC_API_KEY`) or a Hugging Face router
//! (`HF_API_KEY`) without code changes.

use mend_core::{MendError, Result};
use std::env;

/// Read the API key from the configured environment variable
///
/// Empty values count as missing.
pub fn get_api_key(env_name: &str) -> Result<String> {
    match env::var(env_name) {
        Ok(key) if !key.trim().is_empty() => {
            tracing::debug!("Using API key from {}", env_name);
            Ok(key)
        }
        _ => Err(MendError::MissingCredential(format!(
            "{} is not set. Export it or change [generation] api_key_env in .mend/config.toml",
            env_name
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    // Mutex to prevent concurrent env var modifications
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    fn with_env_var<F, R>(key: &str, value: Option<&str>, f: F) -> R
    where
        F: FnOnce() -> R,
    {
        let _guard = ENV_LOCK.lock().unwrap();

        let original = env::var(key).ok();
        match value {
            Some(v) => env::set_var(key, v),
            None => env::remove_var(key),
        }

        let result = f();

        match original {
            Some(v) => env::set_var(key, v),
            None => env::remove_var(key),
        }

        result
    }

    #[test]
    fn test_key_present() {
        with_env_var("MEND_TEST_KEY_PRESENT", Some("sk-test"), || {
            assert_eq!(get_api_key("MEND_TEST_KEY_PRESENT").unwrap(), "sk-test");
        });
    }

    #[test]
    fn test_key_missing() {
        with_env_var("MEND_TEST_KEY_MISSING", None, || {
            let err = get_api_key("MEND_TEST_KEY_MISSING").unwrap_err();
            assert!(matches!(err, MendError::MissingCredential(_)));
        });
    }

    #[test]
    fn test_blank_key_counts_as_missing() {
        with_env_var("MEND_TEST_KEY_BLANK", Some("   "), || {
            assert!(get_api_key("MEND_TEST_KEY_BLANK").is_err());
        });
    }
}
