use scraper::{ElementRef, Selector};

use super::remove_excess_whitespace;

/// Whitespace-normalized text of the first element matching `selector`, or of
/// its `attr` attribute when one is given. Empty values count as missing.
pub fn text_from_selection(
    selector: &Selector,
    element: ElementRef<'_>,
    attr: Option<&str>,
) -> Option<String> {
    element
        .select(selector)
        .find_map(|found| match attr {
            Some(attr) => found.value().attr(attr).and_then(non_empty),
            None => get_inner_text(found),
        })
}

/// Joins every text node below `element`.
pub fn get_inner_text(element: ElementRef<'_>) -> Option<String> {
    let joined: String = element.text().collect::<Vec<_>>().join(" ");
    non_empty(&joined)
}

fn non_empty(s: &str) -> Option<String> {
    let s = remove_excess_whitespace(s);
    if s.is_empty() {
        None
    } else {
        Some(s.into_owned())
    }
}
