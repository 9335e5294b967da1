use std::collections::HashSet;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context as _;
use async_trait::async_trait;
use reqwest::header::{ACCEPT, USER_AGENT};
use scraper::{ElementRef, Html, Selector};
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::cli::ScrapeArgs;
use crate::formats::{ScrapeFrontMatter, ScrapedImage, ScrapedPage};

const MAX_BODY_BYTES: usize = 5 * 1024 * 1024;
const MAX_IMAGES: usize = 20;

#[async_trait]
pub trait Scraper: Send + Sync {
    async fn scrape(&self, url: &Url, cancel: &CancellationToken) -> anyhow::Result<ScrapedPage>;
}

#[derive(Debug, Clone)]
pub struct HttpScraper {
    client: reqwest::Client,
}

impl HttpScraper {
    pub fn new() -> anyhow::Result<Self> {
        Self::with_timeout(Duration::from_secs(30))
    }

    pub fn with_timeout(timeout: Duration) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .redirect(reqwest::redirect::Policy::limited(10))
            .build()
            .context("build scrape http client")?;
        Ok(Self { client })
    }

    async fn fetch_html(&self, url: &Url) -> anyhow::Result<String> {
        let mut resp = self
            .client
            .get(url.clone())
            .header(USER_AGENT, concat!("articleforge/", env!("CARGO_PKG_VERSION")))
            .header(ACCEPT, "text/html,application/xhtml+xml;q=0.9,*/*;q=0.8")
            .send()
            .await
            .with_context(|| format!("GET {url}"))?;

        let status = resp.status();
        if !status.is_success() {
            anyhow::bail!("GET {url}: http {status}");
        }

        let mut out: Vec<u8> = Vec::new();
        while let Some(chunk) = resp.chunk().await.context("read response chunk")? {
            if out.len() + chunk.len() > MAX_BODY_BYTES {
                let remaining = MAX_BODY_BYTES.saturating_sub(out.len());
                out.extend_from_slice(&chunk[..remaining]);
                tracing::warn!(%url, limit = MAX_BODY_BYTES, "response truncated");
                break;
            }
            out.extend_from_slice(&chunk);
        }
        Ok(String::from_utf8_lossy(&out).into_owned())
    }
}

#[async_trait]
impl Scraper for HttpScraper {
    async fn scrape(&self, url: &Url, cancel: &CancellationToken) -> anyhow::Result<ScrapedPage> {
        if url.scheme() != "http" && url.scheme() != "https" {
            anyhow::bail!("url scheme must be http/https: {url}");
        }

        let html = tokio::select! {
            biased;
            _ = cancel.cancelled() => anyhow::bail!("scrape cancelled: {url}"),
            html = self.fetch_html(url) => html?,
        };
        let page = parse_page(&html, url);
        tracing::info!(
            %url,
            title = %page.title,
            chars = page.content.chars().count(),
            images = page.images.len(),
            "scraped page"
        );
        Ok(page)
    }
}

fn select_first<'a>(root: ElementRef<'a>, css: &str) -> Option<ElementRef<'a>> {
    let selector = Selector::parse(css).ok()?;
    root.select(&selector).next()
}

fn element_text(element: ElementRef<'_>) -> String {
    element
        .text()
        .collect::<Vec<_>>()
        .join(" ")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Extracts the title, Markdown body and image list from an HTML document.
pub fn parse_page(html: &str, base: &Url) -> ScrapedPage {
    let document = Html::parse_document(html);
    let root = document.root_element();

    let title = ["title", "h1"]
        .iter()
        .filter_map(|css| select_first(root, css))
        .map(element_text)
        .find(|text| !text.is_empty())
        .unwrap_or_else(|| base.to_string());

    let body = ["article", "main", "body"]
        .iter()
        .find_map(|css| select_first(root, css))
        .map(|element| element.inner_html())
        .unwrap_or_else(|| html.to_owned());
    let content = html2md::parse_html(&body).trim().to_owned();

    ScrapedPage {
        title,
        content,
        images: collect_images(root, base),
    }
}

fn collect_images(root: ElementRef<'_>, base: &Url) -> Vec<ScrapedImage> {
    let Ok(selector) = Selector::parse("img[src]") else {
        return Vec::new();
    };

    let mut seen = HashSet::new();
    let mut images = Vec::new();
    for element in root.select(&selector) {
        let Some(src) = element.value().attr("src").map(str::trim) else {
            continue;
        };
        let Ok(url) = base.join(src) else {
            continue;
        };
        if url.scheme() != "http" && url.scheme() != "https" {
            continue;
        }
        if !seen.insert(url.to_string()) {
            continue;
        }
        let alt = element
            .value()
            .attr("alt")
            .map(str::trim)
            .filter(|alt| !alt.is_empty())
            .map(str::to_owned);
        images.push(ScrapedImage {
            url: url.to_string(),
            alt,
        });
        if images.len() >= MAX_IMAGES {
            break;
        }
    }
    images
}

/// Markdown document with YAML front matter describing where it came from.
pub fn render_scraped_markdown(url: &Url, page: &ScrapedPage) -> anyhow::Result<String> {
    let front_matter = ScrapeFrontMatter {
        title: page.title.clone(),
        url: url.to_string(),
        retrieved_at: chrono::Utc::now().to_rfc3339(),
        images: page.images.clone(),
    };
    let yaml = serde_yaml::to_string(&front_matter).context("serialize scrape front matter")?;
    Ok(format!("---\n{yaml}---\n\n{}\n", page.content))
}

pub async fn run(args: ScrapeArgs) -> anyhow::Result<()> {
    let url = Url::parse(&args.url).with_context(|| format!("parse url: {}", args.url))?;
    let out_path = PathBuf::from(&args.out);
    if out_path.exists() && !args.force {
        anyhow::bail!("scrape output already exists: {}", out_path.display());
    }

    let scraper = HttpScraper::with_timeout(Duration::from_secs(args.timeout_secs))?;
    let cancel = CancellationToken::new();
    let page = scraper.scrape(&url, &cancel).await?;

    let markdown = render_scraped_markdown(&url, &page)?;
    crate::output::write_output(&out_path, &markdown, args.force)?;
    tracing::info!(out = %out_path.display(), "wrote scraped markdown");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAGE: &str = r#"<html><head><title> Solar   Basics </title></head>
<body><nav>Menu</nav><article><h2>Why solar</h2><p>Panels <b>lower</b> bills.</p>
<img src="/img/a.png" alt="Roof array"><img src="/img/a.png"><img src="data:image/png;base64,AAAA">
<img src="https://cdn.example.org/b.jpg" alt=" "></article></body></html>"#;

    #[test]
    fn parse_page_extracts_title_body_and_images() -> anyhow::Result<()> {
        let base = Url::parse("https://example.com/blog/post")?;
        let page = parse_page(PAGE, &base);

        assert_eq!(page.title, "Solar Basics");
        assert!(page.content.contains("Why solar"));
        assert!(page.content.contains("bills."));
        assert!(!page.content.contains("Menu"));
        assert_eq!(
            page.images,
            vec![
                ScrapedImage {
                    url: "https://example.com/img/a.png".to_owned(),
                    alt: Some("Roof array".to_owned()),
                },
                ScrapedImage {
                    url: "https://cdn.example.org/b.jpg".to_owned(),
                    alt: None,
                },
            ]
        );
        Ok(())
    }

    #[test]
    fn untitled_page_falls_back_to_url() -> anyhow::Result<()> {
        let base = Url::parse("https://example.com/x")?;
        let page = parse_page("<p>hello</p>", &base);
        assert_eq!(page.title, "https://example.com/x");
        assert_eq!(page.content, "hello");
        Ok(())
    }

    #[test]
    fn scraped_markdown_has_front_matter() -> anyhow::Result<()> {
        let url = Url::parse("https://example.com/x")?;
        let page = ScrapedPage {
            title: "T".to_owned(),
            content: "Body".to_owned(),
            images: Vec::new(),
        };
        let markdown = render_scraped_markdown(&url, &page)?;
        let (front, body) = markdown
            .strip_prefix("---\n")
            .and_then(|rest| rest.split_once("---\n"))
            .expect("front matter delimiters");
        let parsed: ScrapeFrontMatter = serde_yaml::from_str(front)?;
        assert_eq!(parsed.title, "T");
        assert_eq!(parsed.url, "https://example.com/x");
        assert_eq!(body, "\nBody\n");
        Ok(())
    }

    #[tokio::test]
    async fn cancelled_scrape_returns_error() -> anyhow::Result<()> {
        let scraper = HttpScraper::new()?;
        let cancel = CancellationToken::new();
        cancel.cancel();
        let url = Url::parse("http://127.0.0.1:9/")?;
        let err = scraper.scrape(&url, &cancel).await.unwrap_err();
        assert!(err.to_string().contains("cancelled"));
        Ok(())
    }

    #[tokio::test]
    async fn rejects_non_http_urls() -> anyhow::Result<()> {
        let scraper = HttpScraper::new()?;
        let url = Url::parse("file:///etc/passwd")?;
        assert!(scraper.scrape(&url, &CancellationToken::new()).await.is_err());
        Ok(())
    }
}
