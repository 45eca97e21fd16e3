//! Symbol ids: `<module>.<object>/<member>`.
//!
//! A symbol id names one property, method or signal of a linkable object.
//! Splitting never fails: a symbol id with no member, or with more than one
//! `/`, yields an empty member.

/// The object id part of a symbol id (everything before the first `/`).
pub fn split_object_id(symbol_id: &str) -> &str {
    split_parts(symbol_id).0
}

/// The member part of a symbol id, or `""`.
pub fn split_member(symbol_id: &str) -> &str {
    split_parts(symbol_id).1
}

/// Split a symbol id into `(object_id, member)`.
pub fn split_parts(symbol_id: &str) -> (&str, &str) {
    let mut parts = symbol_id.split('/');
    let object_id = parts.next().unwrap_or_default();
    match (parts.next(), parts.next()) {
        (Some(member), None) => (object_id, member),
        _ => (object_id, ""),
    }
}

/// Build `<object_id>/<member>`.
pub fn join(object_id: &str, member: &str) -> String {
    format!("{object_id}/{member}")
}
