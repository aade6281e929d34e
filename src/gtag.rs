//! Google Analytics (gtag.js) page module.
//!
//! Once loaded into an [`Application`], the module waits for init to complete.
//! If the active service renders pages, it registers the gtag.js loader and
//! its bootstrap snippet in the head of every page that service runs.
//!
//! ```toml
//! [[modules]]
//! id = "GAnalyticsModule"
//! class = "GAnalyticsModule"
//! MeasurementId = "G-EGXXXXXXXX"
//! ```

use crate::application::{AppEvent, Application, Module, ModuleError, ParameterSource};
use crate::config::ModuleConfig;
use crate::page::{Page, PageEvent, PageService};
use parking_lot::RwLock;
use std::any::Any;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};

/// Application parameter consulted when no measurement id is configured.
pub const MEASUREMENT_ID_PARAMETER: &str = "GoogleAnalyticsMeasurementId";

/// Registration id shared by the loader and the inline snippet.
pub const GTAG_SCRIPT_ID: &str = "gtag";

pub const GTAG_SCRIPT_BASE: &str = "https://www.googletagmanager.com/gtag/js";

pub const DEFAULT_MODULE_ID: &str = "GAnalyticsModule";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttachState {
    /// Constructed; the application has not completed init yet.
    Unattached,
    /// Init completed. `page_service` is false when the active service could
    /// not render pages, in which case the module stays passive for the run.
    Attached { page_service: bool },
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum MeasurementId {
    Unset,
    Override(String),
    Resolved(String),
}

pub struct GAnalyticsModule {
    id: String,
    measurement_id: RwLock<MeasurementId>,
    measurement_id_parameter: RwLock<String>,
    parameters: RwLock<Option<Arc<dyn ParameterSource>>>,
    state: RwLock<AttachState>,
}

impl GAnalyticsModule {
    pub fn new(id: &str) -> Self {
        Self {
            id: id.to_string(),
            measurement_id: RwLock::new(MeasurementId::Unset),
            measurement_id_parameter: RwLock::new(MEASUREMENT_ID_PARAMETER.to_string()),
            parameters: RwLock::new(None),
            state: RwLock::new(AttachState::Unattached),
        }
    }

    pub fn state(&self) -> AttachState {
        *self.state.read()
    }

    /// The configured measurement id, or the value of the measurement id
    /// parameter looked up once and cached. Empty when neither is available.
    pub fn measurement_id(&self) -> String {
        if let MeasurementId::Override(id) | MeasurementId::Resolved(id) =
            &*self.measurement_id.read()
        {
            return id.clone();
        }

        let Some(parameters) = self.parameters.read().clone() else {
            return String::new();
        };
        let key = self.measurement_id_parameter();
        let resolved = resolve_measurement_id(None, parameters.as_ref(), &key);

        let mut slot = self.measurement_id.write();
        if *slot == MeasurementId::Unset {
            debug!(module = %self.id, parameter = %key, "resolved measurement id from parameters");
            *slot = MeasurementId::Resolved(resolved);
        }
        match &*slot {
            MeasurementId::Override(id) | MeasurementId::Resolved(id) => id.clone(),
            MeasurementId::Unset => String::new(),
        }
    }

    /// An empty value clears the override, so the parameter store is used again.
    pub fn set_measurement_id(&self, measurement_id: impl Into<String>) {
        let measurement_id = measurement_id.into();
        *self.measurement_id.write() = if measurement_id.is_empty() {
            MeasurementId::Unset
        } else {
            MeasurementId::Override(measurement_id)
        };
    }

    pub fn measurement_id_parameter(&self) -> String {
        self.measurement_id_parameter.read().clone()
    }

    pub fn set_measurement_id_parameter(&self, parameter: impl Into<String>) {
        *self.measurement_id_parameter.write() = parameter.into();
    }

    /// Sets a configuration property by name, ignoring ASCII case.
    pub fn set_property(&self, name: &str, value: &str) -> Result<(), ModuleError> {
        match name.to_ascii_lowercase().as_str() {
            "measurementid" => self.set_measurement_id(value),
            "measurementidparameter" => self.set_measurement_id_parameter(value),
            _ => {
                return Err(ModuleError::UnknownProperty {
                    module: self.id.clone(),
                    property: name.to_string(),
                });
            }
        }
        Ok(())
    }

    /// Attaches the page handler when the active service can render pages.
    pub fn on_application_init_complete(self: &Arc<Self>, app: &Application) {
        let service = app.service();
        let Some(pages) = service.as_page_service() else {
            debug!(module = %self.id, service = %service.id(), "service cannot render pages; gtag stays passive");
            *self.state.write() = AttachState::Attached {
                page_service: false,
            };
            return;
        };

        let module = Arc::clone(self);
        pages.attach_event_handler(
            PageEvent::PreRunPage,
            Arc::new(move |service: &PageService, page: &Page| {
                module.on_before_page_run(service, page)
            }),
        );
        *self.state.write() = AttachState::Attached { page_service: true };
        debug!(module = %self.id, service = %service.id(), "attached gtag to page service");
    }

    /// Registers the gtag.js loader and bootstrap snippet in the page head.
    pub fn on_before_page_run(&self, _service: &PageService, page: &Page) {
        let measurement_id = self.measurement_id();
        if measurement_id.is_empty() {
            warn!(module = %self.id, path = %page.path(), "no measurement id configured; emitting gtag with an empty id");
        }

        let client_script = page.client_script();
        client_script.register_head_script_file(
            GTAG_SCRIPT_ID,
            &gtag_script_url(&measurement_id),
            true,
        );
        client_script.register_head_script(GTAG_SCRIPT_ID, &gtag_inline_script(&measurement_id));
    }
}

impl Module for GAnalyticsModule {
    fn id(&self) -> &str {
        &self.id
    }

    fn init(self: Arc<Self>, app: &Application, config: &ModuleConfig) -> Result<(), ModuleError> {
        for (name, value) in &config.properties {
            self.set_property(name, value)?;
        }
        *self.parameters.write() = Some(app.parameters());

        let module = self.clone();
        app.attach_event_handler(
            AppEvent::InitComplete,
            Arc::new(move |app: &Application, _: &()| module.on_application_init_complete(app)),
        );
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl fmt::Debug for GAnalyticsModule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GAnalyticsModule")
            .field("id", &self.id)
            .field("measurement_id", &*self.measurement_id.read())
            .field("measurement_id_parameter", &*self.measurement_id_parameter.read())
            .field("state", &self.state())
            .finish()
    }
}

/// An explicit non-empty id wins; otherwise the parameter under `key`, or empty.
pub fn resolve_measurement_id(
    override_id: Option<&str>,
    parameters: &dyn ParameterSource,
    key: &str,
) -> String {
    match override_id {
        Some(id) if !id.is_empty() => id.to_string(),
        _ => parameters.parameter(key).unwrap_or_default(),
    }
}

/// Loader URL. The id is appended as given so it matches the `config` call.
pub fn gtag_script_url(measurement_id: &str) -> String {
    format!("{GTAG_SCRIPT_BASE}?id={measurement_id}")
}

/// The gtag bootstrap: data layer, push-based `gtag`, then the `js` and
/// `config` commands.
pub fn gtag_inline_script(measurement_id: &str) -> String {
    format!(
        "\twindow.dataLayer = window.dataLayer || [];\n\
         \tfunction gtag(){{dataLayer.push(arguments);}}\n\
         \tgtag('js', new Date());\n\
         \tgtag('config', '{measurement_id}');"
    )
}
