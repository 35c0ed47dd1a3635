//! Layout validation.

/// Length of the hyphenated layout.
pub const LAYOUT_LEN: usize = 36;

const HYPHENS: [usize; 4] = [8, 13, 18, 23];
const VERSION_AT: usize = 14;
const VARIANT_AT: usize = 19;

/// Check `value` against the hyphenated layout.
///
/// Hex digits may be either case. The version nibble must be 4 or 7 and the
/// variant nibble must be one of `8 9 a b`.
pub fn is_valid(value: &str) -> bool {
    let bytes = value.as_bytes();
    if bytes.len() != LAYOUT_LEN {
        return false;
    }

    let shape_ok = bytes.iter().enumerate().all(|(i, b)| {
        if HYPHENS.contains(&i) {
            *b == b'-'
        } else {
            b.is_ascii_hexdigit()
        }
    });

    shape_ok
        && matches!(bytes[VERSION_AT], b'4' | b'7')
        && matches!(
            bytes[VARIANT_AT].to_ascii_lowercase(),
            b'8' | b'9' | b'a' | b'b'
        )
}

/// Check a value that may carry a field prefix.
///
/// With a non-empty prefix the value must start with it and the remainder
/// must pass [`is_valid`].
pub fn is_valid_with_prefix(value: &str, prefix: Option<&str>) -> bool {
    match prefix {
        Some(prefix) if !prefix.is_empty() => value.strip_prefix(prefix).is_some_and(is_valid),
        _ => is_valid(value),
    }
}
