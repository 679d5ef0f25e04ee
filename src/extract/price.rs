/// Parses a displayed price into minor units and an optional ISO currency code
///
/// Handles both `1,234.56` and `1.234,56` conventions: the last separator is the
/// decimal mark when one or two digits follow it, otherwise every separator is a
/// grouping mark.
///
/// # Example
///
/// ```
/// use gleaner::extract::parse_price;
///
/// assert_eq!(parse_price("€1.234,50"), Some((123450, Some("EUR".to_string()))));
/// assert_eq!(parse_price("Free"), None);
/// ```
pub fn parse_price(text: &str) -> Option<(i64, Option<String>)> {
    let start = text.find(|c: char| c.is_ascii_digit())?;
    let end = text.rfind(|c: char| c.is_ascii_digit())? + 1;

    let cleaned: Vec<char> = text[start..end]
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == '.' || *c == ',')
        .collect();

    let last_separator = cleaned.iter().rposition(|c| *c == '.' || *c == ',');
    let (integer, fraction): (String, String) = match last_separator {
        Some(pos) if (1..=2).contains(&(cleaned.len() - pos - 1)) => (
            cleaned[..pos].iter().filter(|c| c.is_ascii_digit()).collect(),
            cleaned[pos + 1..].iter().collect(),
        ),
        _ => (
            cleaned.iter().filter(|c| c.is_ascii_digit()).collect(),
            String::new(),
        ),
    };

    let whole: i64 = if integer.is_empty() {
        0
    } else {
        integer.parse().ok()?
    };
    let minor: i64 = match fraction.len() {
        0 => 0,
        1 => fraction.parse::<i64>().ok()? * 10,
        _ => fraction.parse().ok()?,
    };

    let cents = whole.checked_mul(100)?.checked_add(minor)?;
    Some((cents, detect_currency(text)))
}

fn detect_currency(text: &str) -> Option<String> {
    let symbol = if text.contains('€') {
        Some("EUR")
    } else if text.contains('£') {
        Some("GBP")
    } else if text.contains('$') {
        Some("USD")
    } else if text.contains('¥') {
        Some("JPY")
    } else {
        None
    };
    if let Some(code) = symbol {
        return Some(code.to_string());
    }

    text.split(|c: char| !c.is_ascii_alphabetic())
        .find(|word| word.len() == 3 && word.chars().all(|c| c.is_ascii_uppercase()))
        .map(str::to_string)
}
