use regex::Regex;
use std::sync::LazyLock;

static PERCENT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[+-]?\d+(?:[.,]\d+)?%").expect("static percent regex"));

// ── Raw text helpers ──────────────────────────────────────────────────────────

/// Strip everything except digits, comma, dot, minus; comma decimal → dot.
/// "1 234,56 FCFA" → "1234.56" | "185.42" → "185.42" | "" → None
pub fn clean_number(text: &str) -> Option<String> {
    let cleaned: String = text
        .chars()
        .map(|c| if c == '−' { '-' } else { c })
        .filter(|c| c.is_ascii_digit() || *c == ',' || *c == '.' || *c == '-')
        .collect();

    if cleaned.is_empty() {
        return None;
    }

    let commas = cleaned.matches(',').count();
    let has_dot = cleaned.contains('.');

    let normalised = match (commas, has_dot) {
        (0, _) => cleaned,
        // "1,234.56": whichever separator comes last is the decimal one
        (_, true) => {
            let last_comma = cleaned.rfind(',').unwrap_or(0);
            let last_dot = cleaned.rfind('.').unwrap_or(0);
            if last_comma > last_dot {
                cleaned.replace('.', "").replace(',', ".")
            } else {
                cleaned.replace(',', "")
            }
        }
        (1, false) => cleaned.replace(',', "."),
        // "1,234,567": grouping only
        (_, false) => cleaned.replace(',', ""),
    };

    Some(normalised)
}

/// First signed decimal immediately followed by `%`, verbatim.
/// "variation -0.1% aujourd'hui" → "-0.1%"
pub fn extract_percentage(text: &str) -> Option<String> {
    PERCENT_RE.find(text).map(|m| m.as_str().to_string())
}

/// True unless the raw change text carries a negative marker.
pub fn is_positive_change(raw: &str) -> bool {
    !raw.contains('-') && !raw.contains('−')
}

// ── Normalisers ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Validity {
    /// finite and > 0 (indices, prices, exchange rates)
    Positive,
    /// finite and >= 0 (rates that may legitimately sit at zero)
    NonNegative,
}

/// Clean a value cell and check it against the validity rule.
pub fn parse_value(raw: &str, validity: Validity) -> Option<(String, f64)> {
    let cleaned = clean_number(raw)?;
    let value: f64 = cleaned.parse().ok()?;
    let ok = value.is_finite()
        && match validity {
            Validity::Positive => value > 0.0,
            Validity::NonNegative => value >= 0.0,
        };
    ok.then_some((cleaned, value))
}

/// Normalise to `<sign><digits>.<digits>%`.
/// "2.3%" → "+2.3%" | "-1,5%" → "-1.5%" | "0%" → "+0.00%"
pub fn normalise_percent(raw: &str) -> Option<String> {
    let compact: String = raw.split_whitespace().collect();
    let pct = extract_percentage(&compact.replace('−', "-"))?;
    let body = pct.trim_end_matches('%').replace(',', ".");

    let (sign, digits) = match body.strip_prefix('-') {
        Some(rest) => ('-', rest),
        None => ('+', body.trim_start_matches('+')),
    };

    if digits.contains('.') {
        Some(format!("{}{}%", sign, digits))
    } else {
        Some(format!("{}{}.00%", sign, digits))
    }
}

/// Signed absolute change: "1,25" → "+1.25", "-0.4" → "-0.4".
pub fn normalise_change(raw: &str) -> Option<String> {
    let cleaned = clean_number(raw)?;
    let value: f64 = cleaned.parse().ok()?;
    if !value.is_finite() {
        return None;
    }
    if cleaned.starts_with('-') {
        Some(cleaned)
    } else {
        Some(format!("+{}", cleaned))
    }
}

/// Absolute change implied by the current value and a percentage move.
/// A move of -100% or worse has no previous value and yields "+0.00".
pub fn derive_change(value: f64, percent: &str) -> String {
    let p: f64 = percent.trim_end_matches('%').parse().unwrap_or(0.0);
    if p <= -100.0 {
        return format_signed(0.0, 2);
    }
    let delta = value - value / (1.0 + p / 100.0);
    if delta.is_finite() { format_signed(delta, 2) } else { format_signed(0.0, 2) }
}

/// "+1.50" / "-0.25"; zero is rendered with a plus sign.
pub fn format_signed(v: f64, decimals: usize) -> String {
    if v < 0.0 && format!("{:.*}", decimals, v.abs()) != format!("{:.*}", decimals, 0.0) {
        format!("-{:.*}", decimals, v.abs())
    } else {
        format!("+{:.*}", decimals, v.abs())
    }
}

/// Whitespace-collapsed, lowercase, punctuation-free label for matching.
/// "BRVM - COMPOSITE" → "brvm composite"
pub fn normalise_label(s: &str) -> String {
    s.chars()
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

// ── Tests ─────────────────────────────────────────────────────────────────────
