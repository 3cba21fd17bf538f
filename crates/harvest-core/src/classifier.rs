use regex::Regex;

use crate::error::AppError;
use crate::models::ScrapeTarget;

/// Decides which URLs are final content pages worth fetching.
///
/// A URL is final when any configured pattern matches anywhere in it.
/// Holds nothing but the compiled patterns.
#[derive(Debug, Clone)]
pub struct UrlClassifier {
    patterns: Vec<Regex>,
}

impl UrlClassifier {
    pub fn new<S: AsRef<str>>(patterns: &[S]) -> Result<Self, AppError> {
        let patterns = patterns
            .iter()
            .map(|p| {
                Regex::new(p.as_ref()).map_err(|e| {
                    AppError::Validation(format!(
                        "invalid final page pattern '{}': {e}",
                        p.as_ref()
                    ))
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self { patterns })
    }

    pub fn is_final_page(&self, url: &str) -> bool {
        self.patterns.iter().any(|p| p.is_match(url))
    }

    /// Keep only final pages, preserving input order.
    pub fn filter_final_pages(&self, urls: &[String]) -> Vec<String> {
        urls.iter()
            .filter(|url| self.is_final_page(url))
            .cloned()
            .collect()
    }

    /// True iff `url` is an absolute http(s) URL with a host. Never panics.
    pub fn validate_url(url: &str) -> bool {
        ScrapeTarget::parse(url).is_ok()
    }
}
