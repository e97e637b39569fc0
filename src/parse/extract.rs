use rusty_money::iso;
use scraper::{Html, Selector};

use super::{
    price::Price,
    text_from_selection::{get_inner_text, text_from_selection},
    Error,
};
use crate::static_selector;

/// The flat record pulled out of one product page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Listing {
    pub title: String,
    pub price: Option<Price>,
    /// The text the price was parsed from, kept for the scrape log.
    pub price_text: Option<String>,
    pub availability: Option<String>,
    pub description: Option<String>,
}

/// A CSS selector, optionally reading an attribute: `meta[itemprop=price] @content`.
#[derive(Debug, Clone)]
pub struct FieldSelector {
    source: String,
    selector: Selector,
    attr: Option<String>,
}

impl FieldSelector {
    pub fn parse(text: &str) -> Result<Self, Error> {
        let text = text.trim();
        let (css, attr) = match text.rsplit_once(" @") {
            Some((css, attr)) if !attr.trim().is_empty() => (css.trim(), Some(attr.trim().to_owned())),
            _ => (text, None),
        };
        let selector = Selector::parse(css).map_err(|e| Error::selector_error(css, e))?;
        Ok(Self {
            source: text.to_owned(),
            selector,
            attr,
        })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    fn text(&self, doc: &Html) -> Option<String> {
        text_from_selection(&self.selector, doc.root_element(), self.attr.as_deref())
    }
}

/// Applies one site's selectors to fetched documents.
#[derive(Debug, Clone)]
pub struct Extractor {
    title: FieldSelector,
    price: FieldSelector,
    availability: Option<FieldSelector>,
    description: Option<FieldSelector>,
    currency: &'static iso::Currency,
}

impl Extractor {
    pub fn new(title: &str, price: &str) -> Result<Self, Error> {
        Ok(Self {
            title: FieldSelector::parse(title)?,
            price: FieldSelector::parse(price)?,
            availability: None,
            description: None,
            currency: iso::USD,
        })
    }

    pub fn availability(mut self, selector: &str) -> Result<Self, Error> {
        self.availability = Some(FieldSelector::parse(selector)?);
        Ok(self)
    }

    pub fn description(mut self, selector: &str) -> Result<Self, Error> {
        self.description = Some(FieldSelector::parse(selector)?);
        Ok(self)
    }

    /// Currency assumed when the price text names none.
    pub fn currency(mut self, code: &str) -> Result<Self, Error> {
        self.currency = iso::find(code)
            .ok_or_else(|| Error::price_parse_error(&format!("unknown currency code `{code}`")))?;
        Ok(self)
    }

    pub fn extract(&self, html: &str) -> Result<Listing, Error> {
        let doc = Html::parse_document(html);

        let title = self
            .title
            .text(&doc)
            .or_else(|| fallback_title(&doc))
            .ok_or_else(|| {
                Error::html_parse_error(&format!(
                    "no title found with `{}` or page metadata",
                    self.title.source()
                ))
            })?;

        let price_text = self.price.text(&doc).or_else(|| fallback_price(&doc));
        let currency = meta_currency(&doc).unwrap_or(self.currency);
        let price = price_text
            .as_deref()
            .and_then(|text| Price::parse_with_fallback(text, currency));

        Ok(Listing {
            title,
            price,
            price_text,
            availability: self.availability.as_ref().and_then(|s| s.text(&doc)),
            description: self.description.as_ref().and_then(|s| s.text(&doc)),
        })
    }
}

fn fallback_title(doc: &Html) -> Option<String> {
    static_selector!(OG_TITLE <- r#"meta[property="og:title"]"#);
    static_selector!(H1 <- "h1");
    static_selector!(TITLE <- "head > title");
    let root = doc.root_element();
    text_from_selection(&OG_TITLE, root, Some("content"))
        .or_else(|| text_from_selection(&H1, root, None))
        .or_else(|| text_from_selection(&TITLE, root, None))
}

fn fallback_price(doc: &Html) -> Option<String> {
    static_selector!(ITEMPROP_PRICE <- r#"[itemprop="price"]"#);
    static_selector!(OG_PRICE <- r#"meta[property="product:price:amount"]"#);
    let root = doc.root_element();
    text_from_selection(&ITEMPROP_PRICE, root, Some("content"))
        .or_else(|| root.select(&ITEMPROP_PRICE).find_map(get_inner_text))
        .or_else(|| text_from_selection(&OG_PRICE, root, Some("content")))
}

fn meta_currency(doc: &Html) -> Option<&'static iso::Currency> {
    static_selector!(ITEMPROP_CURRENCY <- r#"[itemprop="priceCurrency"]"#);
    static_selector!(OG_CURRENCY <- r#"meta[property="product:price:currency"]"#);
    let root = doc.root_element();
    text_from_selection(&ITEMPROP_CURRENCY, root, Some("content"))
        .or_else(|| text_from_selection(&OG_CURRENCY, root, Some("content")))
        .and_then(|code| iso::find(code.trim()))
}
