// Currency helpers for MXN amounts (es_MX conventions)

/// Format an amount the way es_MX renders MXN: `$1,234.56`, `-$10.00`.
pub fn format_mxn(amount: f64) -> String {
    let rounded = (amount * 100.0).round() / 100.0;
    let sign = if rounded < 0.0 { "-" } else { "" };
    format!("{}${}", sign, group_thousands(rounded.abs()))
}

/// Dashboard indicator format: `$1,234.56`, negatives as `$-1,234.56`.
pub fn format_indicator(amount: f64) -> String {
    let rounded = (amount * 100.0).round() / 100.0;
    let sign = if rounded < 0.0 { "-" } else { "" };
    format!("${}{}", sign, group_thousands(rounded.abs()))
}

/// Two decimals with comma thousands separators. Expects a non-negative value.
pub fn group_thousands(value: f64) -> String {
    let fixed = format!("{:.2}", value);
    let (int_part, dec_part) = fixed.split_once('.').unwrap_or((fixed.as_str(), "00"));

    let mut grouped = String::with_capacity(int_part.len() + int_part.len() / 3);
    for (i, ch) in int_part.chars().enumerate() {
        if i > 0 && (int_part.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(ch);
    }

    format!("{}.{}", grouped, dec_part)
}

/// Parse a balance reported by the model: commas and `$` are dropped.
pub fn parse_reported_amount(raw: &str) -> Option<f64> {
    let cleaned: String = raw.chars().filter(|c| *c != ',' && *c != '$').collect();
    parse_finite(&cleaned)
}

/// Parse a balance already stored in the log (`$1,234.56`, `MXN 10.00`).
pub fn parse_logged_amount(raw: &str) -> Option<f64> {
    let cleaned: String = raw
        .chars()
        .filter(|c| !matches!(c, '$' | ',' | 'M' | 'X' | 'N'))
        .collect();
    parse_finite(&cleaned)
}

fn parse_finite(raw: &str) -> Option<f64> {
    raw.trim().parse::<f64>().ok().filter(|v| v.is_finite())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_mxn() {
        assert_eq!(format_mxn(0.0), "$0.00");
        assert_eq!(format_mxn(12.5), "$12.50");
        assert_eq!(format_mxn(1234.567), "$1,234.57");
        assert_eq!(format_mxn(1_000_000.0), "$1,000,000.00");
        assert_eq!(format_mxn(-980.1), "-$980.10");
    }

    #[test]
    fn test_format_indicator_negative() {
        assert_eq!(format_indicator(-1234.5), "$-1,234.50");
        assert_eq!(format_indicator(999.999), "$1,000.00");
    }

    #[test]
    fn test_parse_reported_amount() {
        assert_eq!(parse_reported_amount("$12,345.67"), Some(12345.67));
        assert_eq!(parse_reported_amount(" 500 "), Some(500.0));
        assert_eq!(parse_reported_amount("12,345.67 MXN"), None);
        assert_eq!(parse_reported_amount("inf"), None);
        assert_eq!(parse_reported_amount(""), None);
    }

    #[test]
    fn test_parse_logged_amount() {
        assert_eq!(parse_logged_amount("$1,234.56"), Some(1234.56));
        assert_eq!(parse_logged_amount("MXN 10.00"), Some(10.0));
        assert_eq!(parse_logged_amount("-$3.00"), Some(-3.0));
        assert_eq!(parse_logged_amount("No encontrado"), None);
    }
}
