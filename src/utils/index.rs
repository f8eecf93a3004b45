/// Format an integer coin amount with a fixed number of decimal places.
///
/// Formatting is integer-exact so large accumulated amounts never lose
/// precision on display.
pub fn format_value(amount: u128, decimals: u32) -> String {
    if decimals == 0 {
        return amount.to_string();
    }
    let scale = 10u128.pow(decimals);
    format!(
        "{}.{:0width$}",
        amount / scale,
        amount % scale,
        width = decimals as usize
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats_fractional_amounts() {
        assert_eq!(format_value(1_000, 8), "0.00001000");
        assert_eq!(format_value(150_000_000, 8), "1.50000000");
    }

    #[test]
    fn large_amounts_stay_exact() {
        assert_eq!(
            format_value(21_000_000_000_000_001, 8),
            "210000000.00000001"
        );
    }
}
