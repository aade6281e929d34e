use crate::config::ModuleConfig;
use crate::events::{EventHandlers, Handler};
use crate::gtag::GAnalyticsModule;
use crate::page::PageService;
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum ModuleError {
    #[error("unknown module class `{0}`")]
    UnknownClass(String),
    #[error("duplicate module id `{0}`")]
    DuplicateId(String),
    #[error("module `{module}` has no property `{property}`")]
    UnknownProperty { module: String, property: String },
}

/// Read access to application-wide named parameters.
pub trait ParameterSource: Send + Sync {
    fn parameter(&self, key: &str) -> Option<String>;
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParameterStore(pub HashMap<String, String>);

impl ParameterStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.insert(key, value);
        self
    }
}

impl ParameterSource for ParameterStore {
    fn parameter(&self, key: &str) -> Option<String> {
        self.0.get(key).cloned()
    }
}

/// A request-handling service. Capabilities are discovered through the
/// `as_*` queries rather than by inspecting the concrete type.
pub trait Service: Send + Sync + fmt::Debug {
    fn id(&self) -> &str;

    fn as_page_service(&self) -> Option<&PageService> {
        None
    }
}

/// Plugin module loaded into an [`Application`] from a `[[modules]]` entry.
pub trait Module: Send + Sync {
    fn id(&self) -> &str;

    /// Applies the configured properties and attaches the module's handlers.
    fn init(self: Arc<Self>, app: &Application, config: &ModuleConfig) -> Result<(), ModuleError>;

    fn as_any(&self) -> &dyn Any;
}

/// Events raised by [`Application`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppEvent {
    /// Raised once, after every module has been initialized.
    InitComplete,
}

/// One application run: the parameter store, the active service and the
/// modules that were loaded for it.
pub struct Application {
    parameters: Arc<dyn ParameterSource>,
    service: Arc<dyn Service>,
    on_init_complete: EventHandlers<Application, ()>,
    modules: Vec<Arc<dyn Module>>,
    init_completed: AtomicBool,
}

impl Application {
    pub fn builder(service: Arc<dyn Service>) -> ApplicationBuilder {
        ApplicationBuilder {
            service,
            parameters: Arc::new(ParameterStore::default()),
            modules: Vec::new(),
        }
    }

    pub fn attach_event_handler(&self, event: AppEvent, handler: Handler<Application, ()>) {
        match event {
            AppEvent::InitComplete => self.on_init_complete.attach(handler),
        }
    }

    pub fn service(&self) -> &Arc<dyn Service> {
        &self.service
    }

    pub fn parameters(&self) -> Arc<dyn ParameterSource> {
        self.parameters.clone()
    }

    pub fn parameter(&self, key: &str) -> Option<String> {
        self.parameters.parameter(key)
    }

    pub fn module(&self, id: &str) -> Option<&Arc<dyn Module>> {
        self.modules.iter().find(|m| m.id() == id)
    }

    /// Looks up a module by id and downcasts it to its concrete type.
    pub fn module_as<T: 'static>(&self, id: &str) -> Option<&T> {
        self.module(id).and_then(|m| m.as_any().downcast_ref::<T>())
    }

    /// Raises `InitComplete`. Only the first call has any effect.
    pub fn complete_init(&self) {
        if self.init_completed.swap(true, Ordering::SeqCst) {
            return;
        }
        debug!(
            service = %self.service.id(),
            handlers = self.on_init_complete.len(),
            "application init complete"
        );
        self.on_init_complete.raise(self, &());
    }
}

impl fmt::Debug for Application {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Application")
            .field("service", &self.service.id())
            .field(
                "modules",
                &self.modules.iter().map(|m| m.id()).collect::<Vec<_>>(),
            )
            .field("on_init_complete", &self.on_init_complete)
            .finish()
    }
}

pub struct ApplicationBuilder {
    service: Arc<dyn Service>,
    parameters: Arc<dyn ParameterSource>,
    modules: Vec<ModuleConfig>,
}

impl ApplicationBuilder {
    pub fn parameters(mut self, parameters: Arc<dyn ParameterSource>) -> Self {
        self.parameters = parameters;
        self
    }

    pub fn module(mut self, config: ModuleConfig) -> Self {
        self.modules.push(config);
        self
    }

    pub fn modules(mut self, configs: impl IntoIterator<Item = ModuleConfig>) -> Self {
        self.modules.extend(configs);
        self
    }

    /// Instantiates and initializes every configured module, in order.
    pub fn build(self) -> Result<Application, ModuleError> {
        let mut app = Application {
            parameters: self.parameters,
            service: self.service,
            on_init_complete: EventHandlers::new(),
            modules: Vec::with_capacity(self.modules.len()),
            init_completed: AtomicBool::new(false),
        };
        for config in &self.modules {
            if app.module(&config.id).is_some() {
                return Err(ModuleError::DuplicateId(config.id.clone()));
            }
            let module = create_module(config)?;
            module.clone().init(&app, config)?;
            app.modules.push(module);
        }
        Ok(app)
    }
}

fn create_module(config: &ModuleConfig) -> Result<Arc<dyn Module>, ModuleError> {
    match config.class.to_ascii_lowercase().as_str() {
        "ganalyticsmodule" | "gtag" => Ok(Arc::new(GAnalyticsModule::new(&config.id))),
        _ => Err(ModuleError::UnknownClass(config.class.clone())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[derive(Debug)]
    struct ConsoleService;

    impl Service for ConsoleService {
        fn id(&self) -> &str {
            "console"
        }
    }

    #[test]
    fn parameter_lookup_returns_none_when_absent() {
        let params = ParameterStore::new().with("Known", "value");
        let app = Application::builder(Arc::new(ConsoleService))
            .parameters(Arc::new(params))
            .build()
            .unwrap();
        assert_eq!(app.parameter("Known").as_deref(), Some("value"));
        assert_eq!(app.parameter("Missing"), None);
    }

    #[test]
    fn services_have_no_page_capability_by_default() {
        let app = Application::builder(Arc::new(ConsoleService)).build().unwrap();
        assert!(app.service().as_page_service().is_none());
        assert_eq!(app.service().id(), "console");
    }

    #[test]
    fn init_complete_is_raised_once() {
        let app = Application::builder(Arc::new(ConsoleService)).build().unwrap();
        let calls = Arc::new(Mutex::new(0));
        let counter = calls.clone();
        app.attach_event_handler(
            AppEvent::InitComplete,
            Arc::new(move |_app: &Application, _: &()| *counter.lock() += 1),
        );
        app.complete_init();
        app.complete_init();
        assert_eq!(*calls.lock(), 1);
    }

    #[test]
    fn rejects_unknown_module_class() {
        let err = Application::builder(Arc::new(ConsoleService))
            .module(ModuleConfig::new("maps", "GoogleMapsModule"))
            .build()
            .unwrap_err();
        assert!(matches!(err, ModuleError::UnknownClass(class) if class == "GoogleMapsModule"));
    }

    #[test]
    fn rejects_duplicate_module_ids() {
        let err = Application::builder(Arc::new(ConsoleService))
            .module(ModuleConfig::new("ga", "GAnalyticsModule"))
            .module(ModuleConfig::new("ga", "gtag"))
            .build()
            .unwrap_err();
        assert!(matches!(err, ModuleError::DuplicateId(id) if id == "ga"));
    }

    #[test]
    fn module_lookup_downcasts_to_concrete_type() {
        let app = Application::builder(Arc::new(ConsoleService))
            .module(ModuleConfig::new("ga", "gtag"))
            .build()
            .unwrap();
        assert!(app.module("ga").is_some());
        assert!(app.module_as::<GAnalyticsModule>("ga").is_some());
        assert!(app.module("other").is_none());
    }
}
