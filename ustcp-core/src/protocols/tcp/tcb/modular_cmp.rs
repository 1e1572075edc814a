//! Comparisons over the 32-bit sequence number ring. Sequence numbers wrap
//! around, so plain `<` on them is meaningless once a connection has moved
//! through 2^32 octets.

/// a < b under modular arithmetic
pub fn mod_le(a: u32, b: u32) -> bool {
    // k is on the opposite side of the ring of integers mod 32 from b
    let k = b.wrapping_add(u32::MAX / 2);

    // There are six cases:
    //  0123456789
    // |a b    k  | a<b, a<k, b<k -> a<b
    // |a k    b  | a<b, a<k, b>k -> a>b
    // |  b a  k  | a>b, a<k, b<k -> a>b
    // |  k a  b  | a<b, a>k, b>k -> a<b
    // |  b    k a| a>b, a>k, b<k -> a<b
    // |  k    b a| a>b, a>k, b>k -> a>b

    (a < b) ^ (a < k) ^ (b < k)
}

/// Whether `x` lies in the half-open window `[left, right)`. A window whose
/// left edge is numerically above its right edge wraps through zero. An empty
/// window (`left == right`) contains nothing.
pub fn in_window(left: u32, x: u32, right: u32) -> bool {
    if left <= right {
        left <= x && x < right
    } else {
        !(right <= x && x < left)
    }
}

/// Whether an acknowledgment number `ack` covers the octet numbered `sent`,
/// that is, whether `ack` lies strictly after `sent` on the ring.
pub fn is_acked(sent: u32, ack: u32) -> bool {
    mod_le(sent, ack)
}

#[cfg(test)]
mod tests {
    use super::*;

    const MAX: u32 = u32::MAX;

    #[test]
    fn modular_comparison() {
        // 2**31 = 2_147_483_648
        assert!(mod_le(10, 20));
        assert!(!mod_le(20, 10));
        assert!(mod_le(2_000_000_000, 3_000_000_000));
        assert!(!mod_le(3_000_000_000, 2_000_000_000));
        assert!(mod_le(3_000_000_000, 4_000_000_000));
        assert!(!mod_le(4_000_000_000, 3_000_000_000));
        assert!(mod_le(MAX, 0));
        assert!(!mod_le(0, MAX));
        assert!(!mod_le(5, 5));
    }

    #[test]
    fn window_low() {
        assert!(in_window(0, 0, 1));
        assert!(in_window(0, 1, 2));
        assert!(in_window(0, 5, 10));
        assert!(!in_window(0, 0, 0));
        assert!(!in_window(0, 1, 0));
        assert!(!in_window(0, 1, 1));
        assert!(in_window(10, 10, 11111));
        assert!(in_window(10, 111151, 21222121));
    }

    #[test]
    fn window_high() {
        assert!(in_window(MAX - 100, MAX - 100, MAX));
        assert!(in_window(MAX - 100, MAX - 99, MAX));
        assert!(!in_window(MAX - 100, MAX, MAX));
        assert!(!in_window(MAX - 100, MAX - 200, MAX));
    }

    #[test]
    fn window_wraps() {
        assert!(in_window(MAX, 6, 10));
        assert!(in_window(MAX, MAX, 10));
        assert!(in_window(MAX, 0, 10));
        assert!(in_window(MAX, 9, 10));
        assert!(!in_window(MAX, 10, 10));
        assert!(!in_window(MAX, 11, 10));
        assert!(!in_window(MAX, MAX - 1, 10));
    }

    #[test]
    fn acknowledgment() {
        assert!(is_acked(100, 101));
        assert!(is_acked(100, 5000));
        assert!(!is_acked(100, 100));
        assert!(!is_acked(100, 99));
        assert!(is_acked(MAX, 0));
        assert!(is_acked(MAX - 3, 2));
        assert!(!is_acked(2, MAX - 3));
    }
}
