use async_trait::async_trait;
use reqwest::Url;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::{truncate_chars, PageRenderer};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct BrowserRenderArgs {
    /// Absolute http or https URL
    pub url: String,
    #[serde(default)]
    pub max_chars: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BrowserRenderOutput {
    pub url: String,
    pub status: u16,
    pub markdown: String,
    pub truncated: bool,
}

pub struct HttpPageRenderer {
    client: reqwest::Client,
    max_chars: usize,
}

impl HttpPageRenderer {
    pub fn new(max_chars: usize) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(20))
            .user_agent(concat!("waypoint/", env!("CARGO_PKG_VERSION")))
            .build()
            .unwrap_or_default();
        Self {
            client,
            max_chars: max_chars.max(1),
        }
    }
}

pub(crate) fn parse_web_url(raw: &str) -> anyhow::Result<Url> {
    let url = Url::parse(raw.trim())?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        other => anyhow::bail!("unsupported url scheme: {other}"),
    }
}

#[async_trait]
impl PageRenderer for HttpPageRenderer {
    async fn render(&self, args: BrowserRenderArgs) -> anyhow::Result<BrowserRenderOutput> {
        let url = parse_web_url(&args.url)?;
        let max_chars = args
            .max_chars
            .map(|v| v.clamp(1, self.max_chars))
            .unwrap_or(self.max_chars);

        let response = self.client.get(url.clone()).send().await?;
        let status = response.status().as_u16();
        let is_html = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.contains("html"))
            .unwrap_or(true);
        let body = response.text().await?;
        let markdown = if is_html {
            html2md::parse_html(&body)
        } else {
            body
        };
        let (markdown, truncated) = truncate_chars(markdown.trim(), max_chars);

        Ok(BrowserRenderOutput {
            url: url.to_string(),
            status,
            markdown,
            truncated,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_only_web_schemes() {
        assert!(parse_web_url("https://example.com/docs").is_ok());
        assert!(parse_web_url("http://localhost:8080").is_ok());
        assert!(parse_web_url("file:///etc/passwd").is_err());
        assert!(parse_web_url("ftp://example.com").is_err());
        assert!(parse_web_url("not a url").is_err());
    }

    #[tokio::test]
    async fn render_rejects_non_web_url_before_fetching() {
        let renderer = HttpPageRenderer::new(100);
        let err = renderer
            .render(BrowserRenderArgs {
                url: "file:///etc/hosts".to_string(),
                max_chars: None,
            })
            .await
            .unwrap_err();
        assert!(err.to_string().contains("unsupported url scheme"));
    }
}
