use anyhow::Context;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::debug;

#[derive(Debug)]
pub enum PageLookup {
    Found(String),
    NotFound,
}

/// Source of page HTML for a request path.
#[async_trait]
pub trait PageSource: Send + Sync {
    async fn load_page(&self, path: &str) -> anyhow::Result<PageLookup>;
}

/// Serves `{root}/{path}.html`, falling back to `{root}/{path}/index.html`.
pub struct FsPageSource {
    root: PathBuf,
}

impl FsPageSource {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn candidates(&self, route: &str) -> Vec<PathBuf> {
        let relative = route.trim_start_matches('/');
        if relative.is_empty() {
            return vec![self.root.join("index.html")];
        }
        vec![
            self.root.join(format!("{relative}.html")),
            self.root.join(relative).join("index.html"),
        ]
    }
}

#[async_trait]
impl PageSource for FsPageSource {
    async fn load_page(&self, path: &str) -> anyhow::Result<PageLookup> {
        let Some(route) = normalize_route(path) else {
            debug!(%path, "rejecting page path");
            return Ok(PageLookup::NotFound);
        };
        for candidate in self.candidates(&route) {
            if fs::metadata(&candidate)
                .await
                .map(|m| m.is_file())
                .unwrap_or(false)
            {
                let html = fs::read_to_string(&candidate)
                    .await
                    .with_context(|| format!("reading html {candidate:?}"))?;
                return Ok(PageLookup::Found(html));
            }
        }
        Ok(PageLookup::NotFound)
    }
}

/// Normalizes a request path to `/a/b` form. Returns `None` for paths that
/// try to leave the page root.
pub fn normalize_route(path: &str) -> Option<String> {
    let path = path.split(['?', '#']).next().unwrap_or_default();
    let mut segments = Vec::new();
    for segment in path.split('/') {
        match segment {
            "" | "." => continue,
            ".." => return None,
            s if s.contains('\\') => return None,
            s => segments.push(s.trim_end_matches(".html")),
        }
    }
    Some(format!("/{}", segments.join("/")))
}
