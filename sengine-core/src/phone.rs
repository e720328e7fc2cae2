/// Strip everything but ASCII digits.
pub fn digits(raw: &str) -> String {
    raw.chars().filter(|c| c.is_ascii_digit()).collect()
}

/// Normalize a phone number to E.164.
///
/// Strips non-digits, prepends the US country code when exactly ten digits
/// remain, and prefixes `+`. Idempotent: normalizing an already-normalized
/// number is a no-op.
pub fn normalize_e164(raw: &str) -> String {
    let mut d = digits(raw);
    if d.len() == 10 {
        d.insert(0, '1');
    }
    format!("+{d}")
}

/// Fuzzy equality for provisioned-number matching.
///
/// Numbers match when their digit strings are equal after dropping a leading
/// US country code from eleven-digit forms, so `+1 (555) 111-2222` matches
/// `5551112222`.
pub fn numbers_match(a: &str, b: &str) -> bool {
    fn canonical(raw: &str) -> String {
        let d = digits(raw);
        match d.strip_prefix('1') {
            Some(rest) if d.len() == 11 => rest.to_string(),
            _ => d,
        }
    }
    let (a, b) = (canonical(a), canonical(b));
    !a.is_empty() && a == b
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn normalizes_ten_digit_numbers() {
        assert_eq!(normalize_e164("(555) 111-2222"), "+15551112222");
        assert_eq!(normalize_e164("555.111.2222"), "+15551112222");
    }

    #[test]
    fn leaves_eleven_digit_numbers_alone() {
        assert_eq!(normalize_e164("+15551112222"), "+15551112222");
        assert_eq!(normalize_e164("15551112222"), "+15551112222");
    }

    #[test]
    fn normalization_is_idempotent() {
        for raw in ["(555) 111-2222", "+15551112222", "+447911123456"] {
            let once = normalize_e164(raw);
            assert_eq!(normalize_e164(&once), once);
        }
    }

    #[test]
    fn fuzzy_match_ignores_formatting_and_country_code() {
        assert!(numbers_match("+15551112222", "555-111-2222"));
        assert!(numbers_match("(555) 111 2222", "5551112222"));
        assert!(!numbers_match("+15551112222", "+15551112223"));
        assert!(!numbers_match("", ""));
    }
}
