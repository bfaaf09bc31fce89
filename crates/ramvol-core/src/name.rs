//! Ordinal filename comparison.
//!
//! Directory entries are ordered by ordinal (code-point) comparison, with an
//! optional ordinal-ignore-case variant that folds each character through its
//! simple uppercase mapping. The same comparator must be used everywhere a
//! name is compared: lookup, insert ordering, re-sorting after rename, and
//! the strictly-greater-than-marker search during enumeration. Mixing
//! comparators would corrupt the per-tooth sort order.

use std::cmp::Ordering;

/// Folds a character through its simple uppercase mapping.
///
/// Multi-character expansions (e.g. `ß` → `SS`) are not applied; a character
/// whose uppercase form is longer than one code point compares as itself.
/// This matches ordinal-ignore-case semantics where folding is a 1:1 table.
#[inline]
pub fn upcase(c: char) -> char {
    let mut up = c.to_uppercase();
    match (up.next(), up.next()) {
        (Some(u), None) => u,
        _ => c,
    }
}

/// Compares two names ordinally, optionally ignoring case.
pub fn ordinal_cmp(a: &str, b: &str, ignore_case: bool) -> Ordering {
    if !ignore_case {
        return a.cmp(b);
    }
    let mut ac = a.chars();
    let mut bc = b.chars();
    loop {
        match (ac.next(), bc.next()) {
            (None, None) => return Ordering::Equal,
            (None, Some(_)) => return Ordering::Less,
            (Some(_), None) => return Ordering::Greater,
            (Some(x), Some(y)) => {
                let ord = upcase(x).cmp(&upcase(y));
                if ord != Ordering::Equal {
                    return ord;
                }
            }
        }
    }
}

/// Tests two names for equality under the configured case policy.
#[inline]
pub fn names_equal(a: &str, b: &str, ignore_case: bool) -> bool {
    ordinal_cmp(a, b, ignore_case) == Ordering::Equal
}

/// Returns the byte cost charged for storing a name.
///
/// Names are accounted as two bytes per UTF-16 code unit, matching the
/// fixed-width wide-character representation the host driver hands us.
#[inline]
pub fn name_cost(name: &str) -> u64 {
    2 * name.encode_utf16().count() as u64
}
