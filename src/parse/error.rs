use std::fmt::Display;

use rusty_money::MoneyError;

#[derive(Debug)]
pub enum Error {
    HtmlParse(String),
    PriceParse(String),
    Selector(String),
}

impl From<MoneyError> for Error {
    fn from(e: MoneyError) -> Self {
        Self::PriceParse(e.to_string())
    }
}

impl Error {
    pub fn html_parse_error(msg: &str) -> Self {
        Self::HtmlParse(msg.to_string())
    }
    pub fn price_parse_error(msg: &str) -> Self {
        Self::PriceParse(msg.to_string())
    }
    pub fn selector_error(selector: &str, reason: impl std::fmt::Debug) -> Self {
        Self::Selector(format!("`{selector}`: {reason:?}"))
    }
}

impl Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::HtmlParse(msg) => write!(f, "HTML Parse Error: {msg}"),
            Self::PriceParse(msg) => write!(f, "Price Parse Error: {msg}"),
            Self::Selector(msg) => write!(f, "Invalid Selector: {msg}"),
        }
    }
}

impl std::error::Error for Error {}
