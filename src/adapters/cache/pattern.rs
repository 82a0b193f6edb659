//! Redis-style glob matching used by the in-memory backend for pattern deletes.

/// Match `key` against a glob supporting `*`, `?`, `[set]`, `[^set]`, `[a-z]` and `\` escapes.
pub fn matches_pattern(pattern: &str, key: &str) -> bool {
    let pattern: Vec<char> = pattern.chars().collect();
    let key: Vec<char> = key.chars().collect();

    let (mut p, mut k) = (0usize, 0usize);
    // Position after the last `*` seen and the key index it is currently absorbing up to.
    let mut backtrack: Option<(usize, usize)> = None;

    while k < key.len() {
        if p < pattern.len() {
            match pattern[p] {
                '*' => {
                    backtrack = Some((p + 1, k));
                    p += 1;
                    continue;
                }
                '?' => {
                    p += 1;
                    k += 1;
                    continue;
                }
                '[' => {
                    if let Some((true, next)) = match_class(&pattern, p, key[k]) {
                        p = next;
                        k += 1;
                        continue;
                    }
                }
                '\\' if p + 1 < pattern.len() => {
                    if pattern[p + 1] == key[k] {
                        p += 2;
                        k += 1;
                        continue;
                    }
                }
                literal => {
                    if literal == key[k] {
                        p += 1;
                        k += 1;
                        continue;
                    }
                }
            }
        }

        match backtrack {
            Some((star_next, absorbed)) => {
                p = star_next;
                k = absorbed + 1;
                backtrack = Some((star_next, absorbed + 1));
            }
            None => return false,
        }
    }

    pattern[p..].iter().all(|c| *c == '*')
}

/// Evaluate a `[...]` class starting at `start`. Returns whether `ch` matched and the index
/// just past the closing bracket, or `None` when the class is unterminated.
fn match_class(pattern: &[char], start: usize, ch: char) -> Option<(bool, usize)> {
    let mut i = start + 1;
    let negate = i < pattern.len() && pattern[i] == '^';
    if negate {
        i += 1;
    }

    let mut matched = false;
    while i < pattern.len() && pattern[i] != ']' {
        let mut low = pattern[i];
        if low == '\\' && i + 1 < pattern.len() {
            i += 1;
            low = pattern[i];
        }

        if i + 2 < pattern.len() && pattern[i + 1] == '-' && pattern[i + 2] != ']' {
            let high = pattern[i + 2];
            let (lo, hi) = if low <= high { (low, high) } else { (high, low) };
            if lo <= ch && ch <= hi {
                matched = true;
            }
            i += 3;
        } else {
            if low == ch {
                matched = true;
            }
            i += 1;
        }
    }

    if i >= pattern.len() {
        return None;
    }

    Some((matched != negate, i + 1))
}

#[cfg(test)]
mod tests {
    use super::matches_pattern;

    #[test]
    fn prefix_wildcard_matches_resource_keys() {
        assert!(matches_pattern("orders:*", "orders:GET:/api/orders"));
        assert!(matches_pattern("orders:*", "orders:GET:/api/orders?status=pending"));
        assert!(!matches_pattern("orders:*", "order:GET:/api/orders/1"));
    }

    #[test]
    fn inner_wildcards_backtrack() {
        assert!(matches_pattern(
            "product:*/products/42",
            "product:GET:/api/products/42"
        ));
        assert!(!matches_pattern(
            "product:*/products/42",
            "product:GET:/api/products/421"
        ));
        assert!(matches_pattern(
            "product:*/products/42\\?*",
            "product:GET:/api/products/42?fields=name"
        ));
        assert!(!matches_pattern(
            "product:*/products/42\\?*",
            "product:GET:/api/products/421"
        ));
    }

    #[test]
    fn question_mark_and_classes() {
        assert!(matches_pattern("k?y", "key"));
        assert!(!matches_pattern("k?y", "ky"));
        assert!(matches_pattern("h[ae]llo", "hallo"));
        assert!(!matches_pattern("h[^e]llo", "hello"));
        assert!(matches_pattern("v[0-9]", "v7"));
    }

    #[test]
    fn escaped_metacharacters_are_literal() {
        assert!(matches_pattern("a\\*b", "a*b"));
        assert!(!matches_pattern("a\\*b", "axb"));
    }

    #[test]
    fn empty_pattern_only_matches_empty_key() {
        assert!(matches_pattern("", ""));
        assert!(!matches_pattern("", "x"));
        assert!(matches_pattern("*", ""));
    }
}
