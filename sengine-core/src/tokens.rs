use rand::Rng;
use time::OffsetDateTime;
use uuid::Uuid;

/// Mint a short human-scannable tracking token for one send.
///
/// Shape: `DM-<unix millis>-<6 random digits>`. The token correlates our
/// `messages` row with provider status callbacks.
pub fn mint_b_ref(now: OffsetDateTime) -> String {
    let millis = now.unix_timestamp_nanos() / 1_000_000;
    let suffix: u32 = rand::thread_rng().gen_range(0..1_000_000);
    format!("DM-{millis}-{suffix:06}")
}

/// Mint an opaque unique token for a `messages` row.
pub fn mint_uid() -> String {
    Uuid::new_v4().to_string()
}

#[cfg(test)]
mod test {
    use super::*;
    use time::macros::datetime;

    #[test]
    fn b_ref_embeds_millis_and_six_digits() {
        let b_ref = mint_b_ref(datetime!(2024-05-01 12:00 UTC));
        let parts: Vec<&str> = b_ref.splitn(3, '-').collect();
        assert_eq!(parts[0], "DM");
        assert_eq!(parts[1], "1714564800000");
        assert_eq!(parts[2].len(), 6);
        assert!(parts[2].chars().all(|c| c.is_ascii_digit()));
    }

    #[test]
    fn uids_are_unique() {
        assert_ne!(mint_uid(), mint_uid());
    }
}
