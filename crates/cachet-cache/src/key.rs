//! Key namespacing.

/// The prefix a tier prepends to every raw key before it reaches the backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Keyspace {
    prefix: String,
}

impl Keyspace {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    /// Use the tier's own prefix when configured, otherwise the global one.
    pub fn resolve(tier_prefix: Option<&str>, global_prefix: &str) -> Self {
        Self::new(tier_prefix.unwrap_or(global_prefix))
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Prefixed key for a raw key.
    pub fn key(&self, raw: &str) -> String {
        let mut key = String::with_capacity(self.prefix.len() + raw.len());
        key.push_str(&self.prefix);
        key.push_str(raw);
        key
    }

    pub fn keys(&self, raw: &[String]) -> Vec<String> {
        raw.iter().map(|k| self.key(k)).collect()
    }

    /// Whether a backend key belongs to this keyspace.
    pub fn owns(&self, key: &str) -> bool {
        key.starts_with(&self.prefix)
    }

    /// Redis `SCAN MATCH` pattern selecting every key in this keyspace.
    pub fn scan_pattern(&self) -> String {
        let mut pattern = String::with_capacity(self.prefix.len() + 1);
        for c in self.prefix.chars() {
            if matches!(c, '*' | '?' | '[' | ']' | '\\') {
                pattern.push('\\');
            }
            pattern.push(c);
        }
        pattern.push('*');
        pattern
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefixes_raw_keys_deterministically() {
        let ks = Keyspace::new("app:");
        assert_eq!(ks.key("user:1"), "app:user:1");
        assert_eq!(ks.key("user:1"), ks.key("user:1"));
        assert!(ks.owns("app:user:1"));
        assert!(!ks.owns("other:user:1"));
    }

    #[test]
    fn tier_prefix_overrides_global() {
        assert_eq!(Keyspace::resolve(Some("r:"), "g:").prefix(), "r:");
        assert_eq!(Keyspace::resolve(None, "g:").prefix(), "g:");
    }

    #[test]
    fn scan_pattern_escapes_glob_characters() {
        assert_eq!(Keyspace::new("app:").scan_pattern(), "app:*");
        assert_eq!(Keyspace::new("a*b?[c]").scan_pattern(), "a\\*b\\?\\[c\\]*");
    }
}
