//! Deterministic cloud resource names.
//!
//! Names embed a truncated md5 of the identifying inputs so that any change
//! to an identity-bearing field (a target group's port, a stack's name)
//! yields a new name and therefore a structural create/delete pair instead
//! of an illegal in-place mutation. Two runs over identical inputs always
//! produce identical names.

/// Lowercases and strips everything but `[a-z0-9]` so a fragment is safe
/// inside a cloud resource name.
pub fn sanitize(fragment: &str) -> String {
    fragment
        .chars()
        .filter_map(|c| {
            let c = c.to_ascii_lowercase();
            c.is_ascii_alphanumeric().then_some(c)
        })
        .collect()
}

/// Like [`sanitize`] but keeps interior hyphens, for prefixes whose source
/// is already DNS-shaped (cluster names).
pub fn sanitize_prefix(fragment: &str) -> String {
    let kept: String = fragment
        .chars()
        .filter_map(|c| {
            let c = c.to_ascii_lowercase();
            (c.is_ascii_alphanumeric() || c == '-').then_some(c)
        })
        .collect();
    kept.trim_matches('-').to_string()
}

/// Lowercase hex md5 of the `/`-joined parts, truncated to `len` characters.
pub fn hashed_suffix(parts: &[&str], len: usize) -> String {
    let digest = md5::compute(parts.join("/").as_bytes());
    let mut hex = format!("{digest:x}");
    hex.truncate(len);
    hex
}
