//! Scraping layer: page navigation, field extraction, value cleaning.
//!
//! Nothing in here knows about caching or fallback; callers get either a
//! validated value or a [`ScrapeError`] saying why not.

pub mod cleaner;
pub mod error;
pub mod navigator;
pub mod parsers;

pub use self::error::ScrapeError;
pub use self::navigator::{HttpNavigator, NavigationOptions, PageNavigator, RenderedPage};
