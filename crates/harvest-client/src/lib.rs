pub mod extractor;
pub mod fetcher;

pub use extractor::{HtmlExtractor, clean_text};
pub use fetcher::ReqwestFetcher;
