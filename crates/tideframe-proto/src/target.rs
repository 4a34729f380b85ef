//! Target address space: sigils, folding and handle validation.
//!
//! A target string is classified by its first character: `#` group,
//! `=` server, `&` remote, the literal `*` the null/broadcast target, and
//! anything else a user handle. Names are compared and stored case-folded;
//! display case is preserved separately where user-supplied.

use crate::MAXTARGET;

/// The null/broadcast target.
pub const WILDCARD: &str = "*";

/// Whether `target` names a group.
pub fn is_group(target: &str) -> bool {
    target.starts_with('#')
}

/// Whether `target` names a server.
pub fn is_server(target: &str) -> bool {
    target.starts_with('=')
}

/// Whether `target` names a remote (tunneled) entity.
pub fn is_remote(target: &str) -> bool {
    target.starts_with('&')
}

/// Whether `target` is the null/broadcast target.
pub fn is_wildcard(target: &str) -> bool {
    target == WILDCARD
}

/// Case-fold a name for storage and comparison.
pub fn fold(name: &str) -> String {
    name.to_lowercase()
}

// Characters excluded from the first position of a handle, and from the
// rest of it. Matches `^[^#!=&$,?*\[\]][^=$,?*\[\]]+$`.
const BAD_LEAD: &[char] = &['#', '!', '=', '&', '$', ',', '?', '*', '[', ']'];
const BAD_REST: &[char] = &['=', '$', ',', '?', '*', '[', ']'];

/// Whether `name` is a well-formed user handle.
pub fn valid_handle(name: &str) -> bool {
    if name.len() > MAXTARGET {
        return false;
    }

    let mut chars = name.chars();
    let Some(first) = chars.next() else { return false };
    if BAD_LEAD.contains(&first) {
        return false;
    }

    let mut rest = 0;
    for c in chars {
        if BAD_REST.contains(&c) {
            return false;
        }
        rest += 1;
    }
    rest >= 1
}

/// Whether `name` is a well-formed group name: `#` followed by a handle
/// tail.
pub fn valid_group(name: &str) -> bool {
    if name.len() > MAXTARGET {
        return false;
    }

    let Some(rest) = name.strip_prefix('#') else { return false };
    !rest.is_empty() && !rest.chars().any(|c| BAD_REST.contains(&c))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sigil_classification() {
        assert!(is_group("#room"));
        assert!(is_server("=hub"));
        assert!(is_remote("&far"));
        assert!(is_wildcard("*"));
        assert!(!is_group("alice"));
    }

    #[test]
    fn handle_validation() {
        assert!(valid_handle("alice"));
        assert!(valid_handle("Alice-42"));
        assert!(!valid_handle("a")); // too short
        assert!(!valid_handle("#room"));
        assert!(!valid_handle("=server"));
        assert!(!valid_handle("al*ce"));
        assert!(!valid_handle("al[ce"));
        assert!(!valid_handle(""));
        assert!(!valid_handle(&"x".repeat(MAXTARGET + 1)));
    }

    #[test]
    fn group_validation() {
        assert!(valid_group("#room"));
        assert!(!valid_group("room"));
        assert!(!valid_group("#"));
        assert!(!valid_group("#ro*om"));
        assert!(!valid_group(&format!("#{}", "x".repeat(MAXTARGET))));
    }

    #[test]
    fn folding() {
        assert_eq!(fold("Alice"), "alice");
        assert_eq!(fold("#Room"), "#room");
    }
}
