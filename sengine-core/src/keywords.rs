/// Bodies that unsubscribe a contact, matched exactly after trim + lowercase.
pub const OPT_OUT: &[&str] = &["stop", "unsubscribe", "cancel", "end", "quit", "stopall"];

/// Bodies that re-subscribe a contact.
pub const OPT_IN: &[&str] = &["start", "unstop", "subscribe", "yes"];

fn matches_any(body: &str, keywords: &[&str]) -> bool {
    let body = body.trim().to_lowercase();
    keywords.contains(&body.as_str())
}

/// Whether an inbound body is an opt-out request.
pub fn is_opt_out(body: &str) -> bool {
    matches_any(body, OPT_OUT)
}

/// Whether an inbound body is an opt-in request.
pub fn is_opt_in(body: &str) -> bool {
    matches_any(body, OPT_IN)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn exact_keywords_match_after_trim_and_lowercase() {
        assert!(is_opt_out("STOP"));
        assert!(is_opt_out("  stop \n"));
        assert!(is_opt_out("StopAll"));
        assert!(is_opt_in("start"));
        assert!(is_opt_in(" YES "));
    }

    #[test]
    fn embedded_keywords_do_not_match() {
        assert!(!is_opt_out("please stop"));
        assert!(!is_opt_out("stop!"));
        assert!(!is_opt_in("yes please"));
    }
}
