#[macro_export]
macro_rules! ternary {
    ($condition:expr, $if_true:expr, $if_false:expr) => {
        if $condition != 0 { $if_true } else { $if_false }
    };
}

/// Parses `0x`-prefixed hex, `0b`-prefixed binary or plain decimal numbers
pub fn parse_number(token: &str) -> Option<u32> {
    let token = token.trim();
    if let Some(hex) = token
        .strip_prefix("0x")
        .or_else(|| token.strip_prefix("0X"))
    {
        u32::from_str_radix(hex, 16).ok()
    } else if let Some(bin) = token.strip_prefix("0b") {
        u32::from_str_radix(bin, 2).ok()
    } else {
        token.parse().ok()
    }
}

#[cfg(test)]
mod util_tests {
    use super::parse_number;

    #[test]
    fn ternary_on_bit_mask() {
        let byte = 0xa1u8;
        assert_eq!(ternary!(byte & 0x1, "read", "write"), "read");
        assert_eq!(ternary!(byte & 0x2, "set", "clear"), "clear");
    }

    #[test]
    fn numbers_in_all_radixes() {
        assert_eq!(parse_number("0x50"), Some(0x50));
        assert_eq!(parse_number("0b1010"), Some(10));
        assert_eq!(parse_number("42"), Some(42));
        assert_eq!(parse_number("0xzz"), None);
    }
}
