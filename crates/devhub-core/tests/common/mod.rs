//! Test doubles and common utilities for loader contract tests
//!
//! The doubles record every lifecycle call into a shared journal so tests can
//! assert ordering and call counts without real feature plugins.

#![allow(dead_code)]

use axum::response::IntoResponse;
use devhub_core::error::{Error, Result};
use devhub_core::router::handler_fn;
use devhub_core::{
    ConfigEvents, ConfigOption, MethodFilter, Plugin, PluginContext, PluginDescriptor,
    PluginFactory, RouteKind, RoutePattern, SharedRouter,
};
use std::sync::{Arc, Mutex};

/// Shared record of lifecycle calls
#[derive(Clone, Default)]
pub struct Journal {
    calls: Arc<Mutex<Vec<String>>>,
    events: Arc<Mutex<Vec<ConfigEvents>>>,
}

impl Journal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, call: impl Into<String>) {
        self.calls.lock().unwrap().push(call.into());
    }

    /// All recorded calls, in order
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    /// Recorded calls starting with `prefix`, prefix stripped
    pub fn calls_of(&self, prefix: &str) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|c| c.strip_prefix(prefix).map(str::to_string))
            .collect()
    }

    /// Config sender handed to the plugin named `name`
    pub fn events_for(&self, name: &str) -> ConfigEvents {
        self.events
            .lock()
            .unwrap()
            .iter()
            .find(|e| e.plugin() == name)
            .cloned()
            .expect("plugin was created")
    }
}

/// How a recording plugin should fail, if at all
#[derive(Clone, Copy, PartialEq, Eq)]
pub enum Failure {
    None,
    Create,
    Load,
}

/// Factory for [`RecordingPlugin`]s
pub struct RecordingFactory {
    journal: Journal,
    failure: Failure,
}

impl RecordingFactory {
    pub fn new(journal: Journal) -> Self {
        Self {
            journal,
            failure: Failure::None,
        }
    }

    pub fn failing(journal: Journal, failure: Failure) -> Self {
        Self { journal, failure }
    }
}

impl PluginFactory for RecordingFactory {
    fn create(&self, ctx: PluginContext) -> Result<Box<dyn Plugin>> {
        self.journal.record(format!("create:{}", ctx.name));
        if self.failure == Failure::Create {
            return Err(Error::plugin(ctx.name, "refusing to start"));
        }
        self.journal.events.lock().unwrap().push(ctx.events.clone());
        Ok(Box::new(RecordingPlugin {
            name: ctx.name,
            router: ctx.router,
            journal: self.journal.clone(),
            fail_load: self.failure == Failure::Load,
            loaded: false,
        }))
    }

    fn default_descriptor(&self) -> PluginDescriptor {
        PluginDescriptor::new("recording").with_option("count", ConfigOption::number(1, "Count", 0))
    }
}

/// Plugin that serves `GET /<name>` and journals its lifecycle
pub struct RecordingPlugin {
    name: String,
    router: SharedRouter,
    journal: Journal,
    fail_load: bool,
    loaded: bool,
}

#[async_trait::async_trait]
impl Plugin for RecordingPlugin {
    fn name(&self) -> &str {
        &self.name
    }

    async fn load(&mut self) -> Result<()> {
        if self.loaded {
            return Err(Error::lifecycle("already loaded"));
        }
        self.journal.record(format!("load:{}", self.name));

        let body = format!("hello from {}", self.name);
        self.router.register(
            RoutePattern::exact(format!("/{}", self.name)),
            MethodFilter::Any,
            RouteKind::Static,
            self.name.clone(),
            handler_fn(move |_req| {
                let body = body.clone();
                async move { body.into_response() }
            }),
        )?;

        if self.fail_load {
            return Err(Error::plugin(self.name.clone(), "load failed after registering"));
        }
        self.loaded = true;
        Ok(())
    }

    fn unload(&mut self) {
        if !self.loaded {
            return;
        }
        self.journal.record(format!("unload:{}", self.name));
        self.router.remove_owned_by(&self.name);
        self.loaded = false;
    }

    fn is_loaded(&self) -> bool {
        self.loaded
    }
}

/// Descriptor pointing at the recording factory
pub fn recording(enabled: bool) -> PluginDescriptor {
    PluginDescriptor::new("recording")
        .with_enabled(enabled)
        .with_option("count", ConfigOption::number(1, "Count", 0))
}
