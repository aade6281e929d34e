//! Google Analytics (gtag.js) injection for server-rendered pages.
//!
//! [`gtag::GAnalyticsModule`] is a plugin module for the small page-service
//! host in this crate. The host runs one [`application::Application`] per
//! request. The application raises `InitComplete`, and a page service then
//! raises `PreRunPage` before it renders the page. The module listens on both
//! events and registers the gtag.js loader and bootstrap snippet in the page head.

pub mod api;
pub mod application;
pub mod config;
pub mod events;
pub mod gtag;
pub mod page;
pub mod routing;
pub mod server;

pub use application::{
    AppEvent, Application, Module, ModuleError, ParameterSource, ParameterStore, Service,
};
pub use config::{AppConfig, HostConfig, ModuleConfig};
pub use gtag::{GAnalyticsModule, MEASUREMENT_ID_PARAMETER};
pub use page::{ClientScriptRegistry, Page, PageEvent, PageService};
