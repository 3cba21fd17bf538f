use std::collections::BTreeMap;
use std::sync::Arc;

use harvest_core::error::AppError;
use harvest_core::models::{ScrapedRecord, Section, stable_record_id};
use harvest_core::traits::ContentExtractor;
use regex::Regex;
use scraper::node::Node;
use scraper::{ElementRef, Html, Selector};

/// Subtrees whose text never counts as page content.
const SKIPPED_TAGS: &[&str] = &["script", "style", "nav", "header", "footer"];

const ID_PATTERNS: &[&str] = &[
    r"/rule/(\d+)",
    r"/regulation/(\d+)",
    r"/document/(\d+)",
    r"id=(\d+)",
    r"/(\d+)/?$",
];

const TITLE_SELECTORS: &[&str] = &[
    "h1.document-title",
    "h1.rule-title",
    ".page-title h1",
    "h1",
    "title",
];

const CONTENT_SELECTORS: &[&str] = &[
    ".document-content",
    ".rule-content",
    ".main-content",
    "main",
    ".content",
    "article",
];

/// A content block must be longer than this to beat the body fallback.
const MIN_CONTENT_CHARS: usize = 100;

/// Collapse whitespace runs to one space, trim, and drop ASCII control
/// characters.
pub fn clean_text(text: &str) -> String {
    text.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .chars()
        .filter(|c| !c.is_ascii_control())
        .collect()
}

fn selector(css: &str) -> Result<Selector, AppError> {
    Selector::parse(css)
        .map_err(|e| AppError::ExtractionError(format!("invalid selector '{css}': {e}")))
}

fn selectors(list: &[&str]) -> Result<Vec<Selector>, AppError> {
    list.iter().map(|&css| selector(css)).collect()
}

struct Compiled {
    id_patterns: Vec<Regex>,
    document_id: Selector,
    data_id: Selector,
    titles: Vec<Selector>,
    contents: Vec<Selector>,
    body: Selector,
    headings: Selector,
    heading_class: Regex,
    meta: Selector,
    published: Selector,
    classed: Selector,
    author_class: Regex,
    doc_type_class: Regex,
}

/// HTML → [`ScrapedRecord`] extractor built on the `scraper` crate.
///
/// Selectors and patterns are compiled once and shared between clones.
#[derive(Clone)]
pub struct HtmlExtractor {
    compiled: Arc<Compiled>,
}

impl HtmlExtractor {
    pub fn new() -> Result<Self, AppError> {
        let regex = |p: &str| {
            Regex::new(p).map_err(|e| AppError::ExtractionError(format!("invalid pattern: {e}")))
        };

        let compiled = Compiled {
            id_patterns: ID_PATTERNS
                .iter()
                .map(|&p| regex(p))
                .collect::<Result<_, _>>()?,
            document_id: selector(r#"meta[name="document-id"]"#)?,
            data_id: selector("[data-id]")?,
            titles: selectors(TITLE_SELECTORS)?,
            contents: selectors(CONTENT_SELECTORS)?,
            body: selector("body")?,
            headings: selector("h2, h3, h4")?,
            heading_class: regex("section|heading")?,
            meta: selector("meta")?,
            published: selector("time.published")?,
            classed: selector("[class]")?,
            author_class: regex("author|byline")?,
            doc_type_class: regex("document-type|rule-type")?,
        };

        Ok(Self {
            compiled: Arc::new(compiled),
        })
    }

    fn extract_id(&self, url: &str, doc: &Html) -> String {
        let c = &self.compiled;

        if let Some(id) = c
            .id_patterns
            .iter()
            .find_map(|p| p.captures(url).and_then(|caps| caps.get(1)))
        {
            return id.as_str().to_string();
        }

        if let Some(id) = doc
            .select(&c.document_id)
            .find_map(|el| el.value().attr("content"))
            .filter(|id| !id.is_empty())
        {
            return id.to_string();
        }

        if let Some(id) = doc
            .select(&c.data_id)
            .find_map(|el| el.value().attr("data-id"))
        {
            return id.to_string();
        }

        stable_record_id(url)
    }

    fn extract_title(&self, doc: &Html) -> Option<String> {
        self.compiled.titles.iter().find_map(|sel| {
            let el = doc.select(sel).next()?;
            Some(clean_text(&el.text().collect::<String>())).filter(|t| !t.is_empty())
        })
    }

    fn extract_text(&self, doc: &Html) -> Option<String> {
        let c = &self.compiled;

        for sel in &c.contents {
            if let Some(el) = doc.select(sel).find(|el| !is_hidden(*el)) {
                let text = clean_text(&visible_text(el));
                if text.chars().count() > MIN_CONTENT_CHARS {
                    return Some(text);
                }
            }
        }

        doc.select(&c.body)
            .next()
            .map(|body| clean_text(&visible_text(body)))
            .filter(|t| !t.is_empty())
    }

    fn extract_sections(&self, doc: &Html) -> Vec<Section> {
        let c = &self.compiled;

        doc.select(&c.headings)
            .filter(|h| !is_hidden(*h) && has_class_matching(*h, &c.heading_class))
            .enumerate()
            .filter_map(|(i, heading)| {
                let id = heading
                    .value()
                    .attr("id")
                    .map(str::to_string)
                    .unwrap_or_else(|| format!("section_{}", i + 1));
                let title = clean_text(&visible_text(heading));

                let text = heading
                    .next_siblings()
                    .take_while(|node| {
                        ElementRef::wrap(*node)
                            .is_none_or(|el| !matches!(el.value().name(), "h2" | "h3" | "h4"))
                    })
                    .filter_map(ElementRef::wrap)
                    .map(|el| clean_text(&visible_text(el)))
                    .filter(|t| !t.is_empty())
                    .collect::<Vec<_>>()
                    .join(" ");

                (!title.is_empty() || !text.is_empty()).then_some(Section { id, title, text })
            })
            .collect()
    }

    fn extract_metadata(&self, doc: &Html) -> BTreeMap<String, String> {
        let c = &self.compiled;
        let mut metadata = BTreeMap::new();

        for meta in doc.select(&c.meta) {
            let el = meta.value();
            let name = el.attr("name").or_else(|| el.attr("property"));
            if let (Some(name), Some(content)) = (name, el.attr("content"))
                && !name.is_empty()
                && !content.is_empty()
            {
                metadata.insert(name.to_string(), content.to_string());
            }
        }

        if let Some(time) = doc.select(&c.published).find(|el| !is_hidden(*el)) {
            let published = time
                .value()
                .attr("datetime")
                .map(str::to_string)
                .unwrap_or_else(|| clean_text(&time.text().collect::<String>()));
            metadata.insert("date_published".to_string(), published);
        }

        if let Some(author) = self.first_with_class(doc, &c.author_class) {
            metadata.insert("author".to_string(), author);
        }
        if let Some(doc_type) = self.first_with_class(doc, &c.doc_type_class) {
            metadata.insert("document_type".to_string(), doc_type);
        }

        metadata
    }

    fn first_with_class(&self, doc: &Html, pattern: &Regex) -> Option<String> {
        doc.select(&self.compiled.classed)
            .find(|el| !is_hidden(*el) && has_class_matching(*el, pattern))
            .map(|el| clean_text(&visible_text(el)))
    }
}

impl ContentExtractor for HtmlExtractor {
    fn extract(&self, html: &str, url: &str) -> Result<ScrapedRecord, AppError> {
        let doc = Html::parse_document(html);

        let mut record = ScrapedRecord::new(url);
        record.id = Some(self.extract_id(url, &doc));
        record.title = self.extract_title(&doc);
        record.text = self.extract_text(&doc);
        record.sections = self.extract_sections(&doc);
        record.metadata = self.extract_metadata(&doc);

        tracing::debug!(
            %url,
            title = record.title.as_deref().unwrap_or(""),
            sections = record.sections.len(),
            "Extracted record"
        );
        Ok(record)
    }
}

/// True if `el` or one of its ancestors is a skipped tag.
fn is_hidden(el: ElementRef<'_>) -> bool {
    SKIPPED_TAGS.contains(&el.value().name())
        || el
            .ancestors()
            .filter_map(ElementRef::wrap)
            .any(|a| SKIPPED_TAGS.contains(&a.value().name()))
}

/// Text under `root`, leaving out skipped subtrees.
fn visible_text(root: ElementRef<'_>) -> String {
    let mut out = String::new();
    for node in root.descendants() {
        if let Node::Text(text) = node.value() {
            let hidden = node
                .ancestors()
                .filter_map(ElementRef::wrap)
                .any(|a| SKIPPED_TAGS.contains(&a.value().name()));
            if !hidden {
                out.push_str(text);
                out.push(' ');
            }
        }
    }
    out
}

fn has_class_matching(el: ElementRef<'_>, pattern: &Regex) -> bool {
    el.value().classes().any(|class| pattern.is_match(class))
}
