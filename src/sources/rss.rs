//! RSS/Atom feed fetching and parsing.
//!
//! Feeds are parsed with a streaming `quick-xml` reader rather than a DOM:
//! Thai outlets ship feeds with stray entities and half-closed tags, and the
//! event loop lets us keep whatever items were complete. Google News feeds
//! are plain RSS behind a search URL.

use once_cell::sync::Lazy;
use quick_xml::events::Event;
use quick_xml::Reader;
use tracing::{debug, instrument, warn};

use crate::config::{FeedConfig, FeedKind};
use crate::error::AggregatorError;
use crate::models::FeedItem;

/// Upper bound on items taken from a single feed per run.
const MAX_ITEMS_PER_FEED: usize = 30;

pub(crate) static CLIENT: Lazy<reqwest::Client> = Lazy::new(|| {
    reqwest::Client::builder()
        .user_agent("sawasdee_news feed fetcher (+https://github.com/sawasdee-labs/sawasdee_news)")
        .build()
        .expect("Could not build HTTP client")
});

/// Resolve a feed config to the URL actually fetched.
pub fn feed_url(feed: &FeedConfig) -> String {
    match feed.kind {
        FeedKind::Rss => feed.url.clone(),
        FeedKind::GoogleNews => format!(
            "https://news.google.com/rss/search?q={}&hl=th&gl=TH&ceid=TH:th",
            urlencoding::encode(&feed.url)
        ),
    }
}

/// Fetch one feed and parse it into [`FeedItem`]s.
#[instrument(level = "info", skip_all, fields(feed = %feed.name))]
pub async fn fetch_feed(feed: &FeedConfig) -> Result<Vec<FeedItem>, AggregatorError> {
    let url = feed_url(feed);
    let response = CLIENT.get(&url).send().await?;
    if !response.status().is_success() {
        return Err(AggregatorError::NonOkStatus(response.status().as_u16()));
    }
    let body = response.text().await?;
    parse_feed(&body, &feed.name)
}

/// Parse an RSS 2.0 or Atom document into [`FeedItem`]s.
///
/// Handles both `<item>` and `<entry>` containers, CDATA titles, Atom
/// `<link href="..."/>` elements, and strips HTML from descriptions.
pub fn parse_feed(xml: &str, source: &str) -> Result<Vec<FeedItem>, AggregatorError> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut items = Vec::new();
    let mut in_item = false;
    let mut current_tag = String::new();
    let mut title = String::new();
    let mut link = String::new();
    let mut description = String::new();
    let mut published = String::new();

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => {
                let name = String::from_utf8_lossy(e.name().as_ref()).into_owned();
                match name.as_str() {
                    "item" | "entry" => {
                        in_item = true;
                        title.clear();
                        link.clear();
                        description.clear();
                        published.clear();
                    }
                    "link" if in_item => {
                        // Atom puts the URL in an attribute, RSS in the body.
                        if let Some(href) = link_href(&e) {
                            link = href;
                        }
                        current_tag = name;
                    }
                    _ => current_tag = name,
                }
            }
            Ok(Event::Empty(e)) => {
                let name = String::from_utf8_lossy(e.name().as_ref()).into_owned();
                if in_item && name == "link" {
                    if let Some(href) = link_href(&e) {
                        link = href;
                    }
                }
            }
            Ok(Event::End(e)) => {
                let raw = e.name();
                let name = String::from_utf8_lossy(raw.as_ref());
                if (name == "item" || name == "entry") && in_item {
                    in_item = false;
                    if link.is_empty() || title.is_empty() {
                        debug!(source, "Skipping feed entry without title or link");
                    } else {
                        items.push(FeedItem {
                            title: title.trim().to_string(),
                            url: link.trim().to_string(),
                            source: source.to_string(),
                            published: (!published.is_empty()).then(|| published.clone()),
                            description: strip_html(&description),
                        });
                        if items.len() >= MAX_ITEMS_PER_FEED {
                            warn!(source, cap = MAX_ITEMS_PER_FEED, "Feed item cap reached");
                            break;
                        }
                    }
                }
            }
            Ok(Event::Text(e)) => {
                if in_item {
                    let text = e.xml_content().unwrap_or_default().into_owned();
                    assign_field(
                        &current_tag,
                        text,
                        &mut title,
                        &mut link,
                        &mut description,
                        &mut published,
                    );
                }
            }
            Ok(Event::CData(e)) => {
                if in_item {
                    let text = String::from_utf8_lossy(e.as_ref()).into_owned();
                    assign_field(
                        &current_tag,
                        text,
                        &mut title,
                        &mut link,
                        &mut description,
                        &mut published,
                    );
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(AggregatorError::Xml(e)),
            _ => {}
        }
    }

    Ok(items)
}

fn assign_field(
    tag: &str,
    text: String,
    title: &mut String,
    link: &mut String,
    description: &mut String,
    published: &mut String,
) {
    match tag {
        "title" => *title = text,
        "link" if link.is_empty() => *link = text,
        "description" | "summary" | "content" => *description = text,
        "pubDate" | "published" | "updated" if published.is_empty() => *published = text,
        _ => {}
    }
}

fn link_href(e: &quick_xml::events::BytesStart<'_>) -> Option<String> {
    e.attributes().flatten().find_map(|attr| {
        (attr.key.as_ref() == b"href")
            .then(|| String::from_utf8_lossy(&attr.value).into_owned())
    })
}

/// Strip HTML tags from a string, returning plain text.
pub(crate) fn strip_html(html: &str) -> String {
    let mut result = String::with_capacity(html.len());
    let mut in_tag = false;
    for ch in html.chars() {
        match ch {
            '<' => in_tag = true,
            '>' => in_tag = false,
            _ if !in_tag => result.push(ch),
            _ => {}
        }
    }
    result.trim().to_string()
}
