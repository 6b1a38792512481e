//! Luhn mod-10 checksum.
//!
//! Deterministic and allocation-free. Every service that validates
//! identifiers must use this exact algorithm so results are reproducible.

/// Digit-sum contribution of each digit when it is doubled.
const DOUBLED: [u32; 10] = [0, 2, 4, 6, 8, 1, 3, 5, 7, 9];

/// Weighted Luhn sum, or `None` if any byte is not an ASCII digit.
fn luhn_sum(digits: &str) -> Option<u32> {
    let mut sum = 0u32;
    for (i, b) in digits.bytes().rev().enumerate() {
        if !b.is_ascii_digit() {
            return None;
        }
        let d = u32::from(b - b'0');
        sum += if i % 2 == 1 { DOUBLED[d as usize] } else { d };
    }
    Some(sum)
}

/// True if `digits` is a non-empty ASCII digit string whose Luhn sum is ≡ 0 mod 10.
pub fn luhn_valid(digits: &str) -> bool {
    !digits.is_empty() && luhn_sum(digits).is_some_and(|sum| sum % 10 == 0)
}

/// Check digit that makes `payload` followed by it Luhn-valid.
pub fn check_digit(payload: &str) -> Option<u8> {
    // Appending a digit shifts every payload position by one, so compute the
    // sum as if a trailing zero were already present.
    let sum = luhn_sum(&format!("{}0", payload))?;
    Some(((10 - sum % 10) % 10) as u8)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_values() {
        assert!(luhn_valid("732829320"));
        assert!(luhn_valid("000000000"));
        assert!(luhn_valid("79927398713"));
        assert!(!luhn_valid("732829321"));
        assert!(!luhn_valid(""));
        assert!(!luhn_valid("73282932a"));
    }

    #[test]
    fn test_check_digit_completes_payload() {
        assert_eq!(check_digit("73282932"), Some(0));
        assert_eq!(check_digit("7992739871"), Some(3));
        for prefix in ["12345678", "00000001", "99999999", "40483304"] {
            let digit = check_digit(prefix).unwrap();
            assert!(luhn_valid(&format!("{}{}", prefix, digit)), "prefix {}", prefix);
        }
        assert_eq!(check_digit("12x"), None);
    }

    #[test]
    fn test_every_single_digit_substitution_is_detected() {
        for seed in ["732829320", "000000000", "552100554", "443061841"] {
            assert!(luhn_valid(seed), "seed {} must be valid", seed);
            let bytes = seed.as_bytes();
            for pos in 0..bytes.len() {
                for replacement in b'0'..=b'9' {
                    if replacement == bytes[pos] {
                        continue;
                    }
                    let mut mutated = bytes.to_vec();
                    mutated[pos] = replacement;
                    let mutated = String::from_utf8(mutated).unwrap();
                    assert!(!luhn_valid(&mutated), "{} should fail", mutated);
                }
            }
        }
    }
}
