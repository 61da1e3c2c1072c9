use std::collections::HashSet;

/// Drop blank items and collapse duplicates to their first occurrence.
///
/// Kept items are returned verbatim; whitespace is only used to decide
/// blankness.
pub fn sanitize<S: AsRef<str>>(items: &[S]) -> Vec<String> {
    let mut seen: HashSet<&str> = HashSet::with_capacity(items.len());
    let mut out = Vec::with_capacity(items.len());
    for item in items {
        let item = item.as_ref();
        if item.trim().is_empty() {
            continue;
        }
        if seen.insert(item) {
            out.push(item.to_string());
        }
    }
    out
}
