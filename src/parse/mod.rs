mod error;
mod extract;
mod price;
mod remove_excess_whitespace;
mod static_selector;
mod text_from_selection;

pub use error::Error;
pub use extract::{Extractor, Listing};
pub use price::Price;
pub use remove_excess_whitespace::remove_excess_whitespace;
