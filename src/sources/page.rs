//! Article page enrichment.
//!
//! For each fresh feed item we fetch the article page and pull out the
//! readable paragraph text plus an `og:image` lead image. Outlets differ
//! wildly in markup, so this stays deliberately generic: paragraph tags for
//! the body, OpenGraph meta for the image.

use once_cell::sync::Lazy;
use scraper::{Html, Selector};
use tracing::{debug, instrument, warn};
use url::Url;

use crate::error::AggregatorError;

use super::rss::CLIENT;

static PARAGRAPHS: Lazy<Selector> =
    Lazy::new(|| Selector::parse("article p, .article-content p, .entry-content p, p").unwrap());
static OG_IMAGE: Lazy<Selector> =
    Lazy::new(|| Selector::parse(r#"meta[property="og:image"]"#).unwrap());

/// Readable content pulled from an article page.
#[derive(Debug, Default)]
pub struct PageExtract {
    pub text: String,
    pub image_url: Option<String>,
}

/// Paragraphs shorter than this are navigation chrome, not body text.
const MIN_PARAGRAPH_CHARS: usize = 40;

/// Body text beyond this is truncated before it reaches the model.
const MAX_BODY_CHARS: usize = 12_000;

/// Fetch an article page and extract body text and a lead image.
#[instrument(level = "info", skip_all, fields(%url))]
pub async fn fetch_extract(url: &str) -> Result<PageExtract, AggregatorError> {
    let response = CLIENT.get(url).send().await?;
    if !response.status().is_success() {
        return Err(AggregatorError::NonOkStatus(response.status().as_u16()));
    }
    let body = response.text().await?;
    let extract = extract_from_html(&body, Url::parse(url).ok().as_ref());
    if extract.text.is_empty() {
        warn!(%url, "Page produced no readable paragraphs");
    } else {
        debug!(%url, bytes = extract.text.len(), "Extracted article body");
    }
    Ok(extract)
}

/// Pull paragraph text and the `og:image` URL out of an HTML document.
/// Relative image URLs resolve against `base`.
pub fn extract_from_html(html: &str, base: Option<&Url>) -> PageExtract {
    let document = Html::parse_document(html);

    let mut text = String::new();
    for element in document.select(&PARAGRAPHS) {
        let paragraph = element.text().collect::<Vec<_>>().join(" ");
        let paragraph = paragraph.trim();
        if paragraph.chars().count() < MIN_PARAGRAPH_CHARS {
            continue;
        }
        text.push_str(paragraph);
        text.push('\n');
        if text.len() >= MAX_BODY_CHARS {
            break;
        }
    }
    if text.len() > MAX_BODY_CHARS {
        let cut = text
            .char_indices()
            .map(|(i, _)| i)
            .take_while(|&i| i <= MAX_BODY_CHARS)
            .last()
            .unwrap_or(0);
        text.truncate(cut);
    }

    let image_url = document
        .select(&OG_IMAGE)
        .find_map(|meta| meta.value().attr("content"))
        .and_then(|content| {
            if content.starts_with("http") {
                Some(content.to_string())
            } else {
                base.and_then(|b| b.join(content).ok())
                    .map(|resolved| resolved.to_string())
            }
        });

    PageExtract {
        text: text.trim_end().to_string(),
        image_url,
    }
}

#[cfg(test)]
mod tests {
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    const PAGE: &str = r#"<!DOCTYPE html>
<html>
<head>
  <meta property="og:image" content="https://cdn.example.com/lead.jpg">
  <title>Test article</title>
</head>
<body>
  <nav><p>Home</p></nav>
  <article>
    <p>Authorities in Phuket reopened the airport on Monday after floodwaters receded from the main runway, ending a three-day closure.</p>
    <p>Airlines said normal schedules would resume within twenty-four hours, though travellers should still expect residual delays.</p>
  </article>
</body>
</html>"#;

    #[test]
    fn extracts_paragraphs_and_og_image() {
        let extract = extract_from_html(PAGE, None);
        assert!(extract.text.contains("reopened the airport"));
        assert!(extract.text.contains("normal schedules"));
        assert!(!extract.text.contains("Home"));
        assert_eq!(
            extract.image_url.as_deref(),
            Some("https://cdn.example.com/lead.jpg")
        );
    }

    #[test]
    fn page_without_og_image_yields_none() {
        let extract = extract_from_html("<html><body><p>Too short.</p></body></html>", None);
        assert!(extract.image_url.is_none());
        assert!(extract.text.is_empty());
    }

    #[test]
    fn relative_og_image_resolves_against_base() {
        let html = r#"<html><head><meta property="og:image" content="/lead.jpg"></head></html>"#;
        let base = Url::parse("https://news.example.com/story/1").unwrap();
        assert_eq!(
            extract_from_html(html, Some(&base)).image_url.as_deref(),
            Some("https://news.example.com/lead.jpg")
        );
        // without a base there is nothing to resolve against
        assert!(extract_from_html(html, None).image_url.is_none());
    }

    #[tokio::test]
    async fn fetch_extract_reads_mocked_page() {
        let mock = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/article"))
            .respond_with(ResponseTemplate::new(200).set_body_raw(PAGE, "text/html"))
            .expect(1)
            .mount(&mock)
            .await;

        let extract = fetch_extract(&format!("{}/article", mock.uri())).await.unwrap();
        assert!(extract.text.contains("Phuket"));
    }
}
