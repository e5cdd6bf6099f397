use regex::Regex;
use rust_decimal::Decimal;
use std::str::FromStr;
use std::sync::LazyLock;

// "$12.50", "-$3", "$-3", "$1,234.5", "$.99", "$12."
static USD: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^(?P<pre>-)?\$(?P<post>-)?(?P<int>0|[1-9]\d{0,2}(?:,\d{3})+|[1-9]\d*)?(?:\.(?P<frac>\d{0,2}))?$",
    )
    .expect("static USD pattern")
});

/// Amount carried by the first whitespace-delimited token of `snippet`,
/// if that token is a well-formed USD amount.
pub fn extract(snippet: &str) -> Option<Decimal> {
    let token = snippet.split_whitespace().next()?;
    parse_usd(token)
}

/// Strict USD validation of a single token. The `$` marker is mandatory.
pub fn parse_usd(token: &str) -> Option<Decimal> {
    let caps = USD.captures(token)?;

    let negative = match (caps.name("pre"), caps.name("post")) {
        (Some(_), Some(_)) => return None,
        (None, None) => false,
        _ => true,
    };

    let int = caps.name("int").map(|m| m.as_str().replace(',', ""));
    let frac = caps.name("frac").map(|m| m.as_str()).unwrap_or("");
    if int.is_none() && frac.is_empty() {
        return None;
    }

    let mut literal = String::with_capacity(token.len());
    if negative {
        literal.push('-');
    }
    literal.push_str(int.as_deref().unwrap_or("0"));
    if !frac.is_empty() {
        literal.push('.');
        literal.push_str(frac);
    }

    Decimal::from_str(&literal).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    #[test]
    fn leading_amount_is_extracted() {
        assert_eq!(extract("$12.50 for your trip"), Some(d("12.50")));
        assert_eq!(extract("  $7.25\nThanks for riding"), Some(d("7.25")));
    }

    #[test]
    fn currency_marker_is_required() {
        assert_eq!(extract("12.50 for your trip"), None);
        assert_eq!(extract("Total $12.50"), None);
    }

    #[test]
    fn malformed_tokens_are_rejected() {
        for token in [
            "$12.5.0", "$$12", "$1$2", "$", "$.", "$12.345", "$1,23", "$012", "--$1", "-$-1",
            "$12.50,", "",
        ] {
            assert_eq!(parse_usd(token), None, "{token:?} should be rejected");
        }
        assert_eq!(extract("$12.5.0 broken"), None);
        assert_eq!(extract(""), None);
        assert_eq!(extract("   "), None);
    }

    #[test]
    fn accepted_notations() {
        assert_eq!(parse_usd("$0.99"), Some(d("0.99")));
        assert_eq!(parse_usd("$.99"), Some(d("0.99")));
        assert_eq!(parse_usd("$12."), Some(d("12")));
        assert_eq!(parse_usd("$15"), Some(d("15")));
        assert_eq!(parse_usd("$1,234.56"), Some(d("1234.56")));
        assert_eq!(parse_usd("$1234.56"), Some(d("1234.56")));
        assert_eq!(parse_usd("-$3.10"), Some(d("-3.10")));
        assert_eq!(parse_usd("$-3.10"), Some(d("-3.10")));
    }
}
