/// Group colors, assigned by group index.
pub const COLOR_CYCLE: [&str; 10] = [
    "#1f77b4", "#ff7f0e", "#2ca02c", "#d62728", "#9467bd",
    "#8c564b", "#e377c2", "#7f7f7f", "#bcbd22", "#17becf",
];

pub fn color_for(index: usize) -> String {
    COLOR_CYCLE[index % COLOR_CYCLE.len()].to_string()
}

/// Parse `#rrggbb` into components.
pub fn hex_to_rgb(hex: &str) -> Option<(u8, u8, u8)> {
    let digits = hex.strip_prefix('#')?;
    if digits.len() != 6 {
        return None;
    }
    let r = u8::from_str_radix(&digits[0..2], 16).ok()?;
    let g = u8::from_str_radix(&digits[2..4], 16).ok()?;
    let b = u8::from_str_radix(&digits[4..6], 16).ok()?;
    Some((r, g, b))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cycles_wrap() {
        assert_eq!(color_for(0), color_for(COLOR_CYCLE.len()));
    }

    #[test]
    fn test_hex_to_rgb() {
        assert_eq!(hex_to_rgb("#ff7f0e"), Some((255, 127, 14)));
        assert_eq!(hex_to_rgb("red"), None);
    }
}
