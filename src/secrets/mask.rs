//! Output masking for secret values
//!
//! The masker is shared by every worker of a run. Secrets can be registered
//! at any time; values resolved through `secrets.*` are added as they are
//! first read.

use parking_lot::RwLock;

/// Replacement text for a redacted secret
pub const DEFAULT_MASK: &str = "***";

/// Masks secret values in captured output and log lines
#[derive(Debug)]
pub struct OutputMasker {
    /// Registered values, longest first so overlapping secrets mask fully
    secrets: RwLock<Vec<String>>,
    mask: String,
}

impl OutputMasker {
    pub fn new() -> Self {
        Self::with_mask(DEFAULT_MASK)
    }

    pub fn with_mask(mask: impl Into<String>) -> Self {
        Self {
            secrets: RwLock::new(Vec::new()),
            mask: mask.into(),
        }
    }

    /// Register a secret value to be masked
    ///
    /// Empty strings are ignored. Multi-line secrets also register each
    /// non-empty line, since output is masked line by line.
    pub fn add_secret(&self, value: impl Into<String>) {
        let value = value.into();
        if value.is_empty() {
            return;
        }

        let mut secrets = self.secrets.write();
        let mut insert = |v: &str| {
            if !v.is_empty() && !secrets.iter().any(|s| s == v) {
                secrets.push(v.to_string());
            }
        };
        insert(&value);
        if value.contains('\n') {
            for line in value.lines() {
                insert(line.trim_end_matches('\r'));
            }
        }
        secrets.sort_by(|a, b| b.len().cmp(&a.len()));
    }

    pub fn add_secrets(&self, values: impl IntoIterator<Item = impl Into<String>>) {
        for value in values {
            self.add_secret(value);
        }
    }

    /// Replace every registered secret in `input`
    pub fn mask(&self, input: &str) -> String {
        let secrets = self.secrets.read();
        let mut result = input.to_string();
        for secret in secrets.iter() {
            if result.contains(secret.as_str()) {
                result = result.replace(secret.as_str(), &self.mask);
            }
        }
        result
    }

    pub fn secret_count(&self) -> usize {
        self.secrets.read().len()
    }
}

impl Default for OutputMasker {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_masks_single_secret() {
        let masker = OutputMasker::new();
        masker.add_secret("super-secret-value");

        let output = masker.mask("The key is super-secret-value here");

        assert_eq!(output, "The key is *** here");
    }

    #[test]
    fn test_masks_multiple_occurrences() {
        let masker = OutputMasker::new();
        masker.add_secret("tok");

        assert_eq!(masker.mask("tok tok tok"), "*** *** ***");
    }

    #[test]
    fn test_ignores_empty_secrets() {
        let masker = OutputMasker::new();
        masker.add_secret("");
        masker.add_secret("real-secret");
        masker.add_secret("real-secret");

        assert_eq!(masker.secret_count(), 1);
        assert_eq!(masker.mask("The real-secret is here"), "The *** is here");
    }

    #[test]
    fn test_longest_secret_wins() {
        let masker = OutputMasker::with_mask("[REDACTED]");
        masker.add_secrets(["abc", "abcdef"]);

        assert_eq!(masker.mask("x abcdef y"), "x [REDACTED] y");
    }

    #[test]
    fn test_multiline_secret_masks_each_line() {
        let masker = OutputMasker::new();
        masker.add_secret("-----BEGIN-----\nbody\n-----END-----");

        assert_eq!(masker.mask("body"), "***");
        assert_eq!(masker.mask("-----END-----"), "***");
    }
}
