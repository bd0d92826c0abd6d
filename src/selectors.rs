//! Selector engine: pulls article links and article fields out of HTML.
//!
//! Everything here is synchronous and side-effect free. Parsing is
//! best-effort (`scraper` never fails on malformed markup), so the only
//! failure the engine reports is a required content field that came back
//! empty.
//!
//! # Modes
//!
//! - **Listing**: [`extract_links`] returns absolute, de-duplicated article
//!   URLs in document order. No match is an empty list, not an error.
//! - **Content**: [`extract_content`] returns title, body and the optional
//!   image/date/author/category fields.
//!
//! Selectors are compiled once (and validated) via [`compile_listing`] and
//! [`CompiledContentSelectors::compile`], then reused for every page of a run.

use crate::error::{SelectorMismatchError, ValidationError};
use crate::models::{ContentSelectors, ExtractedContent, ListingSelectors};
use itertools::Itertools;
use once_cell::sync::Lazy;
use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use url::Url;

static WHITESPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").expect("static regex"));
static NESTED_ANCHOR: Lazy<Selector> =
    Lazy::new(|| Selector::parse("a[href]").expect("static selector"));

/// Compile one CSS selector, rejecting blank or unparsable input.
pub fn compile(field: &'static str, selector: &str) -> Result<Selector, ValidationError> {
    let trimmed = selector.trim();
    if trimmed.is_empty() {
        return Err(ValidationError::Empty { field });
    }
    Selector::parse(trimmed).map_err(|e| ValidationError::InvalidSelector {
        field,
        selector: trimmed.to_string(),
        reason: e.to_string(),
    })
}

fn compile_optional(
    field: &'static str,
    selector: Option<&String>,
) -> Result<Option<Selector>, ValidationError> {
    match selector.map(|s| s.trim()).filter(|s| !s.is_empty()) {
        Some(s) => compile(field, s).map(Some),
        None => Ok(None),
    }
}

/// Compile the listing-page selector.
pub fn compile_listing(selectors: &ListingSelectors) -> Result<Selector, ValidationError> {
    compile("listingSelectors.articleLinks", &selectors.article_links)
}

/// Content selectors compiled and ready to run against article pages.
#[derive(Debug, Clone)]
pub struct CompiledContentSelectors {
    title: Selector,
    content: Selector,
    image: Option<Selector>,
    date: Option<Selector>,
    author: Option<Selector>,
    category: Option<Selector>,
}

impl CompiledContentSelectors {
    pub fn compile(selectors: &ContentSelectors) -> Result<Self, ValidationError> {
        Ok(Self {
            title: compile("contentSelectors.titleSelector", &selectors.title_selector)?,
            content: compile(
                "contentSelectors.contentSelector",
                &selectors.content_selector,
            )?,
            image: compile_optional(
                "contentSelectors.imageSelector",
                selectors.image_selector.as_ref(),
            )?,
            date: compile_optional(
                "contentSelectors.dateSelector",
                selectors.date_selector.as_ref(),
            )?,
            author: compile_optional(
                "contentSelectors.authorSelector",
                selectors.author_selector.as_ref(),
            )?,
            category: compile_optional(
                "contentSelectors.categorySelector",
                selectors.category_selector.as_ref(),
            )?,
        })
    }
}

/// Listing mode: article URLs found on an index page.
///
/// Each matched element contributes its own `href`, or the `href` of the
/// first anchor inside it. Relative links are resolved against `base_url`;
/// fragments are dropped and non-http(s) links (`mailto:`, `javascript:`)
/// are skipped.
pub fn extract_links(html: &str, selector: &Selector, base_url: &Url) -> Vec<String> {
    let document = Html::parse_document(html);
    document
        .select(selector)
        .filter_map(link_target)
        .filter_map(|href| resolve(base_url, href))
        .unique()
        .collect()
}

/// Content mode: structured fields from a single article page.
///
/// # Errors
///
/// [`SelectorMismatchError`] when `title` or `content` is empty after
/// trimming. Optional fields never fail the extraction.
pub fn extract_content(
    html: &str,
    selectors: &CompiledContentSelectors,
    page_url: &Url,
) -> Result<ExtractedContent, SelectorMismatchError> {
    let document = Html::parse_document(html);

    let title = document
        .select(&selectors.title)
        .map(element_text)
        .find(|t| !t.is_empty())
        .ok_or(SelectorMismatchError { field: "title" })?;

    let content = document
        .select(&selectors.content)
        .map(element_text)
        .filter(|t| !t.is_empty())
        .join("\n\n");
    if content.is_empty() {
        return Err(SelectorMismatchError { field: "content" });
    }

    let image = selectors.image.as_ref().and_then(|sel| {
        document
            .select(sel)
            .find_map(|el| first_attr(el, &["src", "data-src", "content", "href"]))
            .and_then(|src| resolve(page_url, src))
    });

    let date = selectors
        .date
        .as_ref()
        .and_then(|sel| attr_or_text(&document, sel, &["datetime", "content"]));
    let author = selectors
        .author
        .as_ref()
        .and_then(|sel| attr_or_text(&document, sel, &["content"]));
    let category = selectors
        .category
        .as_ref()
        .and_then(|sel| attr_or_text(&document, sel, &["content"]));

    Ok(ExtractedContent {
        title,
        content,
        image,
        date,
        author,
        category,
    })
}

fn link_target(element: ElementRef<'_>) -> Option<&str> {
    element.value().attr("href").or_else(|| {
        element
            .select(&NESTED_ANCHOR)
            .next()
            .and_then(|a| a.value().attr("href"))
    })
}

fn resolve(base: &Url, href: &str) -> Option<String> {
    let href = href.trim();
    if href.is_empty() || href.starts_with('#') {
        return None;
    }
    let mut url = base.join(href).ok()?;
    if !matches!(url.scheme(), "http" | "https") {
        return None;
    }
    url.set_fragment(None);
    Some(url.to_string())
}

fn element_text(element: ElementRef<'_>) -> String {
    normalize(&element.text().collect::<Vec<_>>().join(" "))
}

fn normalize(text: &str) -> String {
    WHITESPACE.replace_all(text, " ").trim().to_string()
}

fn first_attr<'a>(element: ElementRef<'a>, attrs: &[&str]) -> Option<&'a str> {
    attrs
        .iter()
        .filter_map(|name| element.value().attr(name))
        .map(str::trim)
        .find(|v| !v.is_empty())
}

fn attr_or_text(document: &Html, selector: &Selector, attrs: &[&str]) -> Option<String> {
    document.select(selector).find_map(|el| {
        first_attr(el, attrs)
            .map(normalize)
            .or_else(|| Some(element_text(el)))
            .filter(|v| !v.is_empty())
    })
}
