use std::{fmt::Display, str::FromStr, sync::OnceLock};

use regex::Regex;
use rust_decimal::Decimal;
use rusty_money::{iso, Money, MoneyError};

use super::Error;

/// A parsed price: an exact decimal amount in an ISO 4217 currency.
///
/// Equality is numeric on the amount (`25.5 == 25.50`) and by currency code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Price(Money<'static, iso::Currency>);

/// Symbols checked in order; multi-character prefixes must come before `$`.
static SYMBOLS: &[(&str, &iso::Currency)] = &[
    ("US$", iso::USD),
    ("C$", iso::CAD),
    ("A$", iso::AUD),
    ("R$", iso::BRL),
    ("$", iso::USD),
    ("€", iso::EUR),
    ("£", iso::GBP),
    ("¥", iso::JPY),
    ("₹", iso::INR),
    ("₩", iso::KRW),
];

impl Price {
    pub fn new(amount: Decimal, currency_code: &str) -> Result<Self, Error> {
        let currency = iso::find(currency_code).ok_or(MoneyError::InvalidCurrency)?;
        Ok(Self(Money::from_decimal(amount, currency)))
    }

    pub fn from_decimal(amount: Decimal, currency: &'static iso::Currency) -> Self {
        Self(Money::from_decimal(amount, currency))
    }

    /// Normalizes free-form price text, falling back to USD when the text
    /// names no currency.
    pub fn parse(text: &str) -> Option<Self> {
        Self::parse_with_fallback(text, iso::USD)
    }

    /// Comma is always a thousands separator and dot always the decimal
    /// separator. The first amount written next to a currency symbol or ISO
    /// code wins; otherwise the first well-formed amount is taken in
    /// `fallback`. Returns `None` when no well-formed amount is present.
    pub fn parse_with_fallback(text: &str, fallback: &'static iso::Currency) -> Option<Self> {
        let mut first = None;
        for (amount, currency) in amounts(text) {
            if let Some(currency) = currency {
                return Some(Self::from_decimal(amount, currency));
            }
            first.get_or_insert(amount);
        }
        first.map(|amount| Self::from_decimal(amount, fallback))
    }

    pub fn amount(&self) -> &Decimal {
        self.0.amount()
    }

    pub fn currency(&self) -> &'static iso::Currency {
        self.0.currency()
    }

    pub fn currency_code(&self) -> &'static str {
        self.currency().iso_alpha_code
    }

    pub fn same_currency(&self, other: &Self) -> bool {
        self.currency_code() == other.currency_code()
    }
}

/// Well-formed amounts in `text`, thousands separators stripped, each with
/// the currency written right before or after it.
fn amounts(text: &str) -> impl Iterator<Item = (Decimal, Option<&'static iso::Currency>)> + '_ {
    static RE: OnceLock<Regex> = OnceLock::new();
    let re = RE.get_or_init(|| {
        Regex::new(r"\d{1,3}(?:,\d{3})+(?:\.\d+)?|\d+(?:\.\d+)?").expect("regex should be valid")
    });
    re.find_iter(text).filter_map(move |m| {
        let (head, rest) = (&text[..m.start()], &text[m.end()..]);
        if !well_formed(head, rest) {
            return None;
        }
        let digits: String = m.as_str().chars().filter(|c| *c != ',').collect();
        let amount = Decimal::from_str(&digits).ok()?;
        Some((amount, currency_before(head).or_else(|| currency_after(rest))))
    })
}

/// Rejects matches that are a fragment of a bigger number, like the `1` of
/// "1,23" or the `23` after it.
fn well_formed(head: &str, rest: &str) -> bool {
    let digit = |c: char| c.is_ascii_digit();
    if rest.starts_with(digit) || (rest.starts_with(',') && rest[1..].starts_with(digit)) {
        return false;
    }
    let mut back = head.chars().rev();
    match back.next() {
        Some(c) if c.is_ascii_digit() => false,
        Some(',' | '.') => !back.next().is_some_and(digit),
        _ => true,
    }
}

fn currency_before(head: &str) -> Option<&'static iso::Currency> {
    let head = head.trim_end();
    let symbol = SYMBOLS
        .iter()
        .find_map(|(symbol, currency)| head.strip_suffix(symbol).map(|rest| (rest, *currency)));
    match symbol {
        // "CAD $49.99"
        Some((rest, currency)) => Some(code_at_end(rest.trim_end()).unwrap_or(currency)),
        None => code_at_end(head),
    }
}

fn currency_after(rest: &str) -> Option<&'static iso::Currency> {
    let rest = rest.trim_start();
    code_at_start(rest).or_else(|| {
        SYMBOLS
            .iter()
            .find(|(symbol, _)| rest.starts_with(symbol))
            .map(|(_, currency)| *currency)
    })
}

fn code_at_end(s: &str) -> Option<&'static iso::Currency> {
    let split = s.len().checked_sub(3)?;
    iso_code(s.get(split..)?, s.get(..split)?.chars().next_back())
}

fn code_at_start(s: &str) -> Option<&'static iso::Currency> {
    iso_code(s.get(..3)?, s.get(3..)?.chars().next())
}

/// Three capitals standing alone as a word, so "DEAL" is not "EAL".
fn iso_code(code: &str, neighbour: Option<char>) -> Option<&'static iso::Currency> {
    if !code.bytes().all(|b| b.is_ascii_uppercase()) || neighbour.is_some_and(char::is_alphabetic) {
        return None;
    }
    iso::find(code)
}

impl Display for Price {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.amount(), self.currency_code())
    }
}

#[derive(serde::Serialize, serde::Deserialize)]
struct PriceRepr {
    amount: String,
    currency: String,
}

impl serde::Serialize for Price {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        PriceRepr {
            amount: self.amount().to_string(),
            currency: self.currency_code().to_owned(),
        }
        .serialize(serializer)
    }
}

impl<'de> serde::Deserialize<'de> for Price {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let repr = PriceRepr::deserialize(deserializer)?;
        let amount = Decimal::from_str(&repr.amount).map_err(serde::de::Error::custom)?;
        Self::new(amount, &repr.currency).map_err(serde::de::Error::custom)
    }
}
