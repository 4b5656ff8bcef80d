//! Title normalization and matching rules.
//!
//! Two titles are considered equal modulo case, leading/trailing
//! whitespace, and runs of spaces/underscores. The backend's canonical
//! spelling is still authoritative; these helpers only implement the
//! client-side comparison half of the contract.

/// Normalizes a title for comparison and cache keying.
///
/// Lowercases, trims, and collapses any run of whitespace or underscores
/// into a single space. The normalized form is never shown to users.
pub fn normalize(title: &str) -> String {
    let mut out = String::with_capacity(title.len());
    let mut in_gap = false;
    for ch in title.trim().chars() {
        if ch.is_whitespace() || ch == '_' {
            in_gap = true;
            continue;
        }
        if in_gap && !out.is_empty() {
            out.push(' ');
        }
        in_gap = false;
        for lower in ch.to_lowercase() {
            out.push(lower);
        }
    }
    out
}

/// Whether two titles match under the normalization rules.
pub fn titles_equal(a: &str, b: &str) -> bool {
    normalize(a) == normalize(b)
}

/// Strips a `#fragment` suffix, if any.
pub fn strip_fragment(title: &str) -> &str {
    match title.find('#') {
        Some(idx) => &title[..idx],
        None => title,
    }
}
