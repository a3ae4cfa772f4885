/// Micro-STX per STX.
pub const USTX: u64 = 1_000_000;

/// Render a micro-STX amount as `N.NNNNNN STX` without going through floats.
pub fn format_stx(ustx: u64) -> String {
    format!("{}.{:06} STX", ustx / USTX, ustx % USTX)
}

/// `SP466...KP27`-style short form used in status output.
pub fn shorten_address(address: &str) -> String {
    let chars: Vec<char> = address.chars().collect();
    if chars.len() <= 10 {
        return address.to_string();
    }
    let head: String = chars[..5].iter().collect();
    let tail: String = chars[chars.len() - 5..].iter().collect();
    format!("{}...{}", head, tail)
}

/// Rough wall-clock estimate for `blocks` at ten minutes per block.
pub fn format_block_eta(blocks: u64) -> String {
    let minutes = blocks * 10;
    if minutes >= 60 {
        format!("{}.{:02} hours", minutes / 60, (minutes % 60) * 100 / 60)
    } else {
        format!("{} minutes", minutes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_stx() {
        assert_eq!(format_stx(0), "0.000000 STX");
        assert_eq!(format_stx(35), "0.000035 STX");
        assert_eq!(format_stx(1_500_000), "1.500000 STX");
        assert_eq!(format_stx(123_456_789), "123.456789 STX");
    }

    #[test]
    fn test_shorten_address() {
        assert_eq!(
            shorten_address("SP466FNC0P7JWTNM2R9T199QRZN1MYEDTAR0KP27"),
            "SP466...0KP27"
        );
        assert_eq!(shorten_address("SP123"), "SP123");
    }

    #[test]
    fn test_format_block_eta() {
        assert_eq!(format_block_eta(3), "30 minutes");
        assert_eq!(format_block_eta(6), "1.00 hours");
        assert_eq!(format_block_eta(15), "2.50 hours");
    }
}
