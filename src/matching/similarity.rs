use super::normalize::comparison_key;

/// Similarity in `[0, 1]` between the target sentence and what was spoken.
///
/// Both sides are reduced to their [`comparison_key`]. Identical keys, or one
/// key containing the other (the speaker added or dropped filler around the
/// sentence), score 1.0. Otherwise the score is
/// `1 - levenshtein / max(len)` over Unicode scalar values.
pub fn similarity(expected: &str, spoken: &str) -> f64 {
    let a = comparison_key(expected);
    let b = comparison_key(spoken);

    match (a.is_empty(), b.is_empty()) {
        (true, true) => return 1.0,
        (true, false) | (false, true) => return 0.0,
        _ => {}
    }

    if a == b || a.contains(b.as_str()) || b.contains(a.as_str()) {
        return 1.0;
    }

    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    let max_len = a.len().max(b.len());
    let distance = levenshtein(&a, &b);

    (1.0 - distance as f64 / max_len as f64).clamp(0.0, 1.0)
}

/// Unit-cost Levenshtein distance.
///
/// Keeps a single row sized to the shorter input, so memory is
/// `O(min(|a|, |b|))`.
pub fn levenshtein<T: PartialEq>(a: &[T], b: &[T]) -> usize {
    let (long, short) = if a.len() >= b.len() { (a, b) } else { (b, a) };

    if short.is_empty() {
        return long.len();
    }

    let mut row: Vec<usize> = (0..=short.len()).collect();

    for (i, long_item) in long.iter().enumerate() {
        let mut diagonal = row[0];
        row[0] = i + 1;
        for (j, short_item) in short.iter().enumerate() {
            let above = row[j + 1];
            let substitution = diagonal + usize::from(long_item != short_item);
            row[j + 1] = (above + 1).min(row[j] + 1).min(substitution);
            diagonal = above;
        }
    }

    row[short.len()]
}
