use rand::{Rng, RngCore};

const FULL_PAYLOAD: usize = 1024 * 1024;
const MINIMAL_PAYLOAD: usize = 64 * 1024;

pub fn random_bytes(size: usize) -> Vec<u8> {
    let mut buf = vec![0u8; size];
    rand::rng().fill_bytes(&mut buf);
    buf
}

/// A 64 hex character name, shaped like a content hash.
pub fn random_name() -> String {
    let mut raw = [0u8; 32];
    rand::rng().fill_bytes(&mut raw);
    raw.iter().map(|b| format!("{b:02x}")).collect()
}

/// Random non-zero size below `max`.
pub fn random_len(max: usize) -> usize {
    rand::rng().random_range(1..max.max(2))
}

/// Random `(offset, length)` window inside an object of `size` bytes.
///
/// A zero length means "read to the end".
pub fn random_window(size: usize) -> (u64, usize) {
    let mut rng = rand::rng();
    let offset = rng.random_range(0..size.max(1));
    let length = rng.random_range(0..=size - offset.min(size));
    (offset as u64, length)
}

pub fn payload_len(minimal: bool) -> usize {
    if minimal {
        MINIMAL_PAYLOAD
    } else {
        FULL_PAYLOAD
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_look_like_hashes() {
        let name = random_name();
        assert_eq!(name.len(), 64);
        assert!(name.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(name, random_name());
    }

    #[test]
    fn random_len_stays_in_bounds() {
        for _ in 0..100 {
            let len = random_len(10);
            assert!((1..10).contains(&len));
        }
        assert_eq!(random_len(1), 1);
    }

    #[test]
    fn windows_fit_inside_the_object() {
        for _ in 0..200 {
            let (offset, length) = random_window(50);
            assert!(offset < 50);
            assert!(offset as usize + length <= 50);
        }
        assert_eq!(random_window(0), (0, 0));
    }
}
