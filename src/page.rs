use crate::application::Service;
use crate::events::{EventHandlers, Handler};
use kuchiki::NodeRef;
use kuchiki::traits::*;
use parking_lot::RwLock;
use thiserror::Error;
use tracing::debug;

pub const PAGE_SERVICE_ID: &str = "page";

#[derive(Debug, Error)]
pub enum PageError {
    #[error("html manipulation failed: {0}")]
    Html(String),
}

/// Events raised by [`PageService`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageEvent {
    /// Raised with the page right before it is run and rendered.
    PreRunPage,
}

/// Service that runs the page lifecycle for HTML-producing requests.
#[derive(Debug)]
pub struct PageService {
    on_pre_run_page: EventHandlers<PageService, Page>,
}

impl PageService {
    pub fn new() -> Self {
        Self {
            on_pre_run_page: EventHandlers::new(),
        }
    }

    pub fn attach_event_handler(&self, event: PageEvent, handler: Handler<PageService, Page>) {
        match event {
            PageEvent::PreRunPage => self.on_pre_run_page.attach(handler),
        }
    }

    pub fn handler_count(&self, event: PageEvent) -> usize {
        match event {
            PageEvent::PreRunPage => self.on_pre_run_page.len(),
        }
    }

    /// Raises `PreRunPage` for the page, then renders it.
    pub fn run_page(&self, page: Page) -> Result<String, PageError> {
        debug!(path = %page.path(), "running page");
        self.on_pre_run_page.raise(self, &page);
        page.render()
    }
}

impl Default for PageService {
    fn default() -> Self {
        Self::new()
    }
}

impl Service for PageService {
    fn id(&self) -> &str {
        PAGE_SERVICE_ID
    }

    fn as_page_service(&self) -> Option<&PageService> {
        Some(self)
    }
}

/// A page about to be rendered: its request path, HTML source and head scripts.
#[derive(Debug)]
pub struct Page {
    path: String,
    html: String,
    client_script: ClientScriptRegistry,
}

impl Page {
    pub fn new(path: impl Into<String>, html: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            html: html.into(),
            client_script: ClientScriptRegistry::default(),
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn client_script(&self) -> &ClientScriptRegistry {
        &self.client_script
    }

    /// Renders the page with every registered head script appended to `<head>`.
    pub fn render(&self) -> Result<String, PageError> {
        if self.client_script.is_empty() {
            return Ok(self.html.clone());
        }
        inject_head_markup(&self.html, &self.client_script.render_head())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeadScriptFile {
    pub url: String,
    pub is_async: bool,
}

/// Head script registrations for one page, keyed by id.
///
/// Files and inline scripts are separate namespaces. Registering an id again
/// replaces the earlier entry in place.
#[derive(Debug, Default)]
pub struct ClientScriptRegistry {
    files: RwLock<Vec<(String, HeadScriptFile)>>,
    scripts: RwLock<Vec<(String, String)>>,
}

impl ClientScriptRegistry {
    pub fn register_head_script_file(&self, id: &str, url: &str, is_async: bool) {
        let file = HeadScriptFile {
            url: url.to_string(),
            is_async,
        };
        upsert(&mut self.files.write(), id, file);
    }

    pub fn register_head_script(&self, id: &str, code: &str) {
        upsert(&mut self.scripts.write(), id, code.to_string());
    }

    pub fn head_script_files(&self) -> Vec<(String, HeadScriptFile)> {
        self.files.read().clone()
    }

    pub fn head_scripts(&self) -> Vec<(String, String)> {
        self.scripts.read().clone()
    }

    pub fn is_head_script_file_registered(&self, id: &str) -> bool {
        self.files.read().iter().any(|(key, _)| key == id)
    }

    pub fn is_head_script_registered(&self, id: &str) -> bool {
        self.scripts.read().iter().any(|(key, _)| key == id)
    }

    pub fn is_empty(&self) -> bool {
        self.files.read().is_empty() && self.scripts.read().is_empty()
    }

    /// Markup for the head: script files first, then inline scripts.
    pub fn render_head(&self) -> String {
        let mut out = String::new();
        for (_, file) in self.files.read().iter() {
            let async_attr = if file.is_async { " async" } else { "" };
            out.push_str(&format!(
                "<script src=\"{}\"{async_attr}></script>\n",
                escape_attr(&file.url)
            ));
        }
        for (_, code) in self.scripts.read().iter() {
            out.push_str(&format!("<script>\n{code}\n</script>\n"));
        }
        out
    }
}

fn upsert<T>(entries: &mut Vec<(String, T)>, id: &str, value: T) {
    match entries.iter_mut().find(|(key, _)| key == id) {
        Some(entry) => entry.1 = value,
        None => entries.push((id.to_string(), value)),
    }
}

fn escape_attr(value: &str) -> String {
    value
        .replace('&', "&amp;")
        .replace('"', "&quot;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

/// Appends `markup` to the end of the document head.
pub fn inject_head_markup(html: &str, markup: &str) -> Result<String, PageError> {
    let document = kuchiki::parse_html().one(html);
    let head = document
        .select_first("head")
        .map_err(|_| PageError::Html("document has no head element".to_string()))?;
    for child in parse_markup(markup)? {
        head.as_node().append(child);
    }
    Ok(document.to_string())
}

fn parse_markup(markup: &str) -> Result<Vec<NodeRef>, PageError> {
    // Parse wrapped so the fragment lands in a known container.
    let wrapper_html = format!("<div id=\"__gtag_head_wrapper\">{markup}</div>");
    let fragment_doc = kuchiki::parse_html().one(wrapper_html);
    let wrapper = fragment_doc
        .select_first("#__gtag_head_wrapper")
        .map_err(|_| PageError::Html("select head wrapper failed".to_string()))?;
    let children = wrapper.as_node().children().collect();
    Ok(children)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    const HTML: &str = "<html><head><title>t</title></head><body><p>hi</p></body></html>";

    #[test]
    fn reregistering_same_id_overwrites() {
        let registry = ClientScriptRegistry::default();
        registry.register_head_script_file("a", "https://one.test/a.js", true);
        registry.register_head_script_file("b", "https://one.test/b.js", false);
        registry.register_head_script_file("a", "https://two.test/a.js", false);

        let files = registry.head_script_files();
        assert_eq!(files.len(), 2);
        assert_eq!(files[0].0, "a");
        assert_eq!(files[0].1.url, "https://two.test/a.js");
        assert!(!files[0].1.is_async);
    }

    #[test]
    fn file_and_inline_ids_are_separate() {
        let registry = ClientScriptRegistry::default();
        registry.register_head_script_file("x", "https://cdn.test/x.js", true);
        registry.register_head_script("x", "console.log(1);");
        assert!(registry.is_head_script_file_registered("x"));
        assert!(registry.is_head_script_registered("x"));
        assert_eq!(registry.head_scripts().len(), 1);
    }

    #[test]
    fn renders_files_before_inline_scripts() {
        let registry = ClientScriptRegistry::default();
        registry.register_head_script("inline", "var a = 1;");
        registry.register_head_script_file("file", "https://cdn.test/f.js?a=1&b=2", true);
        let head = registry.render_head();
        let file_at = head.find("<script src=").expect("file tag");
        let inline_at = head.find("var a = 1;").expect("inline code");
        assert!(file_at < inline_at);
        assert!(head.contains("src=\"https://cdn.test/f.js?a=1&amp;b=2\" async"));
    }

    #[test]
    fn render_without_scripts_keeps_source() {
        let page = Page::new("/", HTML);
        assert_eq!(page.render().unwrap(), HTML);
    }

    #[test]
    fn injects_into_head_not_body() {
        let page = Page::new("/", HTML);
        page.client_script()
            .register_head_script_file("lib", "https://cdn.test/lib.js", true);
        page.client_script().register_head_script("lib", "init();");
        let rendered = page.render().unwrap();

        let head_end = rendered.find("</head>").unwrap();
        let src_at = rendered.find("https://cdn.test/lib.js").unwrap();
        let code_at = rendered.find("init();").unwrap();
        assert!(src_at < head_end);
        assert!(code_at < head_end);
        assert!(rendered.contains("<title>t</title>"));
        assert!(rendered.contains("<p>hi</p>"));
    }

    #[test]
    fn document_without_head_still_gets_one() {
        let rendered = inject_head_markup("<p>bare</p>", "<script>x();</script>").unwrap();
        assert!(rendered.contains("<head><script>x();</script></head>"));
    }

    #[test]
    fn run_page_raises_pre_run_before_render() {
        let service = PageService::new();
        service.attach_event_handler(
            PageEvent::PreRunPage,
            Arc::new(|_service: &PageService, page: &Page| {
                page.client_script().register_head_script("probe", "probe();");
            }),
        );
        assert_eq!(service.handler_count(PageEvent::PreRunPage), 1);
        let rendered = service.run_page(Page::new("/", HTML)).unwrap();
        assert!(rendered.contains("probe();"));
    }

    #[test]
    fn page_service_reports_page_capability() {
        let service = PageService::new();
        let as_service: &dyn Service = &service;
        assert!(as_service.as_page_service().is_some());
        assert_eq!(as_service.id(), PAGE_SERVICE_ID);
    }
}
