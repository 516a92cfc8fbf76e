const HEX: &[u8; 16] = b"0123456789abcdef";

/// Fresh response id: `msg_` followed by 32 lowercase hex digits.
#[must_use]
pub(crate) fn new_message_id() -> String {
    let mut out = String::with_capacity(4 + 32);
    out.push_str("msg_");
    push_u64_hex(&mut out, fastrand::u64(..), 16);
    push_u64_hex(&mut out, fastrand::u64(..), 16);
    out
}

/// Fresh tool-use block id: `toolu_` followed by 24 lowercase hex digits.
#[must_use]
pub(crate) fn new_tool_use_id() -> String {
    let mut out = String::with_capacity(6 + 24);
    out.push_str("toolu_");
    push_u64_hex(&mut out, fastrand::u64(..), 16);
    push_u64_hex(&mut out, fastrand::u64(..), 8);
    out
}

/// Push the low `digits` nibbles of `value` as zero-padded lowercase hex.
#[inline]
fn push_u64_hex(out: &mut String, mut value: u64, digits: usize) {
    let mut buf = [b'0'; 16];
    let digits = digits.min(16);
    let mut idx = digits;
    while idx > 0 {
        idx -= 1;
        let nibble = usize::try_from(value & 0x0f).unwrap_or(0);
        buf[idx] = HEX[nibble];
        value >>= 4;
    }
    for &byte in &buf[..digits] {
        out.push(char::from(byte));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn is_lower_hex(s: &str) -> bool {
        s.bytes().all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
    }

    #[test]
    fn message_id_shape() {
        let id = new_message_id();
        let hex = id.strip_prefix("msg_").unwrap();
        assert_eq!(hex.len(), 32);
        assert!(is_lower_hex(hex));
    }

    #[test]
    fn tool_use_id_shape() {
        let id = new_tool_use_id();
        let hex = id.strip_prefix("toolu_").unwrap();
        assert_eq!(hex.len(), 24);
        assert!(is_lower_hex(hex));
    }

    #[test]
    fn ids_are_distinct() {
        let ids: std::collections::HashSet<String> = (0..64).map(|_| new_message_id()).collect();
        assert_eq!(ids.len(), 64);
    }

    #[test]
    fn push_u64_hex_pads_and_truncates() {
        let mut out = String::new();
        push_u64_hex(&mut out, 0x1234_abcd, 16);
        assert_eq!(out, "000000001234abcd");
        out.clear();
        push_u64_hex(&mut out, 0xdead_beef, 4);
        assert_eq!(out, "beef");
    }
}
