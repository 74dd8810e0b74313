//! Numeric value parsing with SI suffixes.

/// Parse a number with an optional SI suffix.
///
/// Accepts plain floats (`2.2`, `1e-9`, `inf`) and engineering suffixes
/// (`10k`, `100n`, `4.7u`, `1M`, `1meg`).
pub fn parse_value(text: &str) -> Option<f64> {
    let text = text.trim();
    if text.is_empty() {
        return None;
    }
    if let Ok(value) = text.parse::<f64>() {
        return Some(value);
    }
    if let Some(num) = text.strip_suffix("meg").or_else(|| text.strip_suffix("MEG")) {
        return num.parse::<f64>().ok().map(|v| v * 1e6);
    }

    let (num_str, multiplier) = if let Some(last) = text.chars().last() {
        let mult = match last {
            'f' => 1e-15,
            'p' => 1e-12,
            'n' => 1e-9,
            'u' | 'µ' => 1e-6,
            'm' => 1e-3,
            'k' | 'K' => 1e3,
            'M' => 1e6,
            'G' => 1e9,
            _ => 1.0,
        };
        if mult != 1.0 {
            (&text[..text.len() - last.len_utf8()], mult)
        } else {
            (text, 1.0)
        }
    } else {
        (text, 1.0)
    };

    num_str.parse::<f64>().ok().map(|v| v * multiplier)
}

/// `clap` value parser wrapper around [`parse_value`].
#[cfg(feature = "cli")]
pub fn parse_arg(text: &str) -> std::result::Result<f64, String> {
    parse_value(text).ok_or_else(|| format!("'{text}' is not a number"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_parse_suffixes() {
        assert_relative_eq!(parse_value("10k").unwrap(), 10_000.0);
        assert_relative_eq!(parse_value("100n").unwrap(), 100e-9);
        assert_relative_eq!(parse_value("4.7u").unwrap(), 4.7e-6);
        assert_relative_eq!(parse_value("1M").unwrap(), 1_000_000.0);
        assert_relative_eq!(parse_value("2.2").unwrap(), 2.2);
        assert_relative_eq!(parse_value("1meg").unwrap(), 1e6);
        assert_relative_eq!(parse_value("2.5MEG").unwrap(), 2.5e6);
        assert_relative_eq!(parse_value("3f").unwrap(), 3e-15);
    }

    #[test]
    fn test_infinity_is_a_number() {
        assert_eq!(parse_value("inf"), Some(f64::INFINITY));
        assert_eq!(parse_value("-inf"), Some(f64::NEG_INFINITY));
    }

    #[test]
    fn test_exponent_is_not_a_suffix() {
        assert_relative_eq!(parse_value("1e-9").unwrap(), 1e-9);
        assert_relative_eq!(parse_value("-3.5E2").unwrap(), -350.0);
    }

    #[test]
    fn test_rejects_garbage() {
        assert!(parse_value("").is_none());
        assert!(parse_value("abc").is_none());
        assert!(parse_value("k").is_none());
    }
}
