//! The logical frame model shared by both wire encodings.

use std::collections::BTreeMap;

/// Key → ordered values mapping carried by a frame.
///
/// Keys are lowercased on parse. Values for one key keep their insertion
/// order; a duplicate value under the same key is rejected at parse time.
pub type Kval = BTreeMap<String, Vec<String>>;

/// One protocol frame.
///
/// `source` and `target` are protocol names with their sigil (`#` group,
/// `=` server, `&` remote, `*` none); `command` is lowercased on parse.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Originating entity, in protocol name form.
    pub source: String,
    /// Destination entity, in protocol name form.
    pub target: String,
    /// Command name, lowercase.
    pub command: String,
    /// Keyed payload.
    pub kval: Kval,
}

impl Frame {
    /// Build a frame from its parts.
    pub fn new(
        source: impl Into<String>,
        target: impl Into<String>,
        command: impl Into<String>,
        kval: Kval,
    ) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
            command: command.into(),
            kval,
        }
    }

    /// First value under `key`, if any.
    pub fn first(&self, key: &str) -> Option<&str> {
        self.kval.get(key).and_then(|v| v.first()).map(String::as_str)
    }

    /// All values under `key`; empty slice when the key is absent.
    pub fn values(&self, key: &str) -> &[String] {
        self.kval.get(key).map_or(&[], Vec::as_slice)
    }
}

/// Build a [`Kval`] from `key => [values]` pairs.
#[macro_export]
macro_rules! kval {
    () => { $crate::Kval::new() };
    ($($key:expr => [$($value:expr),* $(,)?]),* $(,)?) => {{
        let mut kv = $crate::Kval::new();
        $(kv.insert(String::from($key), vec![$(String::from($value)),*]);)*
        kv
    }};
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accessors() {
        let frame = Frame::new("alice", "#room", "message", kval! {
            "body" => ["hi", "there"],
        });

        assert_eq!(frame.first("body"), Some("hi"));
        assert_eq!(frame.values("body"), ["hi", "there"]);
        assert_eq!(frame.first("missing"), None);
        assert!(frame.values("missing").is_empty());
    }

    #[test]
    fn kval_macro_preserves_value_order() {
        let kv = kval! { "users" => ["alice", "bob", "carol"] };
        assert_eq!(kv["users"], ["alice", "bob", "carol"]);
    }
}
