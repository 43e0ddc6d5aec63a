//! Comparison of key-vault permission sets.
//!
//! The provider echoes permissions back with its own capitalisation
//! ("Get", "List") while requests are sent lower-case, so tokens are compared
//! case-insensitively and without regard to order.

/// Check whether two permission collections grant the same permissions.
///
/// - Returns `false` when exactly one side is `None`.
/// - Returns `false` when the lengths differ.
/// - Otherwise returns `true` iff every token in `a` has a case-insensitively
///   equal token somewhere in `b`.
///
/// Duplicates are not counted; the length check is the only guard.
///
/// ```
/// use tf_prepare_core::permissions::key_permissions_equal;
///
/// let granted = vec!["Get".to_string(), "List".to_string()];
/// let desired = ["list", "get"];
/// assert!(key_permissions_equal(Some(granted.as_slice()), Some(&desired[..])));
/// ```
pub fn key_permissions_equal<A, B>(a: Option<&[A]>, b: Option<&[B]>) -> bool
where
    A: AsRef<str>,
    B: AsRef<str>,
{
    let (a, b) = match (a, b) {
        (None, None) => return true,
        (Some(a), Some(b)) => (a, b),
        _ => return false,
    };

    if a.len() != b.len() {
        return false;
    }

    a.iter().all(|wanted| {
        b.iter()
            .any(|candidate| candidate.as_ref().to_lowercase() == wanted.as_ref().to_lowercase())
    })
}

/// Merge `additions` into `existing`, skipping tokens already present
/// (case-insensitive). Order of first appearance is kept.
pub fn merge_permissions(existing: &mut Vec<String>, additions: &[String]) {
    for token in additions {
        let present = existing
            .iter()
            .any(|current| current.to_lowercase() == token.to_lowercase());
        if !present {
            existing.push(token.clone());
        }
    }
}

#[cfg(test)]
#[path = "permissions_tests.rs"]
mod tests;
