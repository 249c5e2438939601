//! ULID-based record identifiers.
//!
//! Every DUNA record gets a globally unique, time-sortable identifier
//! assigned by the store at insert time. Format: 26-character Crockford
//! base32 string, so listing by id is listing by creation time.
//!
//! Structure: 48 bits timestamp (ms since epoch) + 80 bits random.

use rand::Rng;

const CROCKFORD: &[u8; 32] = b"0123456789ABCDEFGHJKMNPQRSTVWXYZ";

/// Generate a new record identifier.
pub fn new_record_id() -> String {
    let now_ms = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64;

    let mut rng = rand::thread_rng();
    let rand_hi: u16 = rng.r#gen();
    let rand_lo: u64 = rng.r#gen();

    let mut id = String::with_capacity(26);

    // 10 chars of timestamp, most significant first
    for shift in (0..10).rev() {
        id.push(CROCKFORD[((now_ms >> (shift * 5)) & 0x1F) as usize] as char);
    }

    // 16 chars of randomness
    let r = rand_hi as u128 | ((rand_lo as u128) << 16);
    for shift in (0..16).rev() {
        id.push(CROCKFORD[((r >> (shift * 5)) & 0x1F) as usize] as char);
    }

    id
}

/// Whether `s` has the shape of an identifier produced by [`new_record_id`].
pub fn is_record_id(s: &str) -> bool {
    s.len() == 26 && s.bytes().all(|b| CROCKFORD.contains(&b))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn id_length_and_uniqueness() {
        let a = new_record_id();
        let b = new_record_id();
        assert_eq!(a.len(), 26);
        assert_eq!(b.len(), 26);
        assert_ne!(a, b);
    }

    #[test]
    fn id_is_ascii_crockford() {
        let id = new_record_id();
        assert!(is_record_id(&id), "Invalid record id: {id}");
        for c in id.chars() {
            assert!(
                c.is_ascii_digit() || (c.is_ascii_uppercase() && !"ILOU".contains(c)),
                "Invalid Crockford char: {c}"
            );
        }
    }

    #[test]
    fn ids_sort_by_creation_time() {
        let a = new_record_id();
        std::thread::sleep(std::time::Duration::from_millis(2));
        let b = new_record_id();
        assert!(a < b, "Record ids should sort chronologically: {a} vs {b}");
    }

    #[test]
    fn rejects_foreign_ids() {
        assert!(!is_record_id("not-an-id"));
        assert!(!is_record_id("01ARZ3NDEKTSV4RRFFQ69G5FAI")); // 'I' is excluded
    }
}
