//! Glob matching for pattern invalidation.
//!
//! Supports `*` (any run, including empty) and `?` (exactly one character),
//! the subset Redis `SCAN MATCH` shares with us, so both layers agree on
//! which keys a pattern selects.

/// True if `text` matches `pattern` in full.
pub fn glob_match(pattern: &str, text: &str) -> bool {
    let pattern: Vec<char> = pattern.chars().collect();
    let text: Vec<char> = text.chars().collect();

    let (mut p, mut t) = (0, 0);
    // Position of the last `*` seen and the text index it was matched against.
    let mut backtrack: Option<(usize, usize)> = None;

    while t < text.len() {
        match pattern.get(p) {
            Some('*') => {
                backtrack = Some((p, t));
                p += 1;
            }
            Some(&c) if c == '?' || c == text[t] => {
                p += 1;
                t += 1;
            }
            _ => match backtrack {
                Some((star, matched)) => {
                    p = star + 1;
                    t = matched + 1;
                    backtrack = Some((star, matched + 1));
                }
                None => return false,
            },
        }
    }

    pattern[p..].iter().all(|&c| c == '*')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_literals_and_wildcards() {
        assert!(glob_match("732829320", "732829320"));
        assert!(!glob_match("732829320", "73282932"));
        assert!(glob_match("732*", "732829320"));
        assert!(glob_match("*320", "732829320"));
        assert!(glob_match("7?2*2?", "732829320"));
        assert!(!glob_match("7?2*2?", "732829300"));
        assert!(glob_match("*", ""));
        assert!(!glob_match("?", ""));
    }

    #[test]
    fn test_star_backtracking() {
        assert!(glob_match("*00*01", "1200340001"));
        assert!(!glob_match("*00*01", "1200340010"));
        assert!(glob_match("a**b", "ab"));
    }
}
