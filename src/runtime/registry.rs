//! Name → handler registries for orchestrations and activities.
//!
//! Both kinds share `Registry<H>`: an immutable map built once through a
//! builder that records duplicate registrations instead of overwriting.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use ::futures::future::LocalBoxFuture;
use ::futures::FutureExt;

use crate::codec::{Codec, Json};
use crate::{Error, OrchestrationContext};

/// Orchestrator code the executor can replay.
///
/// The returned future borrows nothing and is polled once per pass on the
/// executor's thread, so it does not need to be `Send`.
pub trait OrchestrationHandler: Send + Sync {
    fn invoke(&self, ctx: OrchestrationContext, input: String) -> LocalBoxFuture<'static, Result<String, Error>>;
}

/// Function wrapper that implements `OrchestrationHandler`.
pub struct FnOrchestration<F>(pub F);

impl<F, Fut> OrchestrationHandler for FnOrchestration<F>
where
    F: Fn(OrchestrationContext, String) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<String, Error>> + 'static,
{
    fn invoke(&self, ctx: OrchestrationContext, input: String) -> LocalBoxFuture<'static, Result<String, Error>> {
        (self.0)(ctx, input).boxed_local()
    }
}

/// Activity implementation run by the worker pool. `Err` is an application
/// failure and is recorded as `TaskFailed` without retry.
#[async_trait::async_trait]
pub trait ActivityHandler: Send + Sync {
    async fn invoke(&self, input: String) -> Result<String, String>;
}

/// Function wrapper that implements `ActivityHandler`.
pub struct FnActivity<F>(pub F);

#[async_trait::async_trait]
impl<F, Fut> ActivityHandler for FnActivity<F>
where
    F: Fn(String) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<String, String>> + Send + 'static,
{
    async fn invoke(&self, input: String) -> Result<String, String> {
        (self.0)(input).await
    }
}

pub struct Registry<H: ?Sized> {
    inner: Arc<HashMap<String, Arc<H>>>,
}

// Manual Clone impl since H: ?Sized doesn't auto-derive Clone
impl<H: ?Sized> Clone for Registry<H> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<H: ?Sized> Default for Registry<H> {
    fn default() -> Self {
        Self {
            inner: Arc::new(HashMap::new()),
        }
    }
}

pub struct RegistryBuilder<H: ?Sized> {
    map: HashMap<String, Arc<H>>,
    errors: Vec<String>,
    kind: &'static str,
}

pub type OrchestrationRegistry = Registry<dyn OrchestrationHandler>;
pub type ActivityRegistry = Registry<dyn ActivityHandler>;
pub type OrchestrationRegistryBuilder = RegistryBuilder<dyn OrchestrationHandler>;
pub type ActivityRegistryBuilder = RegistryBuilder<dyn ActivityHandler>;

impl<H: ?Sized> Registry<H> {
    pub fn get(&self, name: &str) -> Option<Arc<H>> {
        let found = self.inner.get(name).cloned();
        if found.is_none() {
            tracing::debug!(
                target: "durable_tasks::runtime::registry",
                requested_name = %name,
                registered_names = ?self.list_names(),
                "registry lookup miss"
            );
        }
        found
    }

    pub fn has(&self, name: &str) -> bool {
        self.inner.contains_key(name)
    }

    /// Registered names, sorted.
    pub fn list_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.inner.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn count(&self) -> usize {
        self.inner.len()
    }
}

impl<H: ?Sized> RegistryBuilder<H> {
    fn with_kind(kind: &'static str) -> Self {
        Self {
            map: HashMap::new(),
            errors: Vec::new(),
            kind,
        }
    }

    fn insert(&mut self, name: String, handler: Arc<H>) {
        if self.map.contains_key(&name) {
            self.errors.push(format!("duplicate {} registration: {name}", self.kind));
            return;
        }
        self.map.insert(name, handler);
    }

    /// Build, keeping the first registration for any duplicated name.
    pub fn build(self) -> Registry<H> {
        Registry {
            inner: Arc::new(self.map),
        }
    }

    /// Build the registry, returning an error if there were any registration errors.
    ///
    /// # Errors
    ///
    /// Returns an error string listing every duplicate registration.
    pub fn build_result(self) -> Result<Registry<H>, String> {
        if self.errors.is_empty() {
            Ok(self.build())
        } else {
            Err(self.errors.join("; "))
        }
    }
}

impl OrchestrationRegistry {
    pub fn builder() -> OrchestrationRegistryBuilder {
        RegistryBuilder::with_kind("orchestration")
    }
}

impl ActivityRegistry {
    pub fn builder() -> ActivityRegistryBuilder {
        RegistryBuilder::with_kind("activity")
    }
}

impl OrchestrationRegistryBuilder {
    pub fn register<F, Fut>(mut self, name: impl Into<String>, f: F) -> Self
    where
        F: Fn(OrchestrationContext, String) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<String, Error>> + 'static,
    {
        self.insert(name.into(), Arc::new(FnOrchestration(f)));
        self
    }

    /// Register with JSON-decoded input and JSON-encoded output. An input
    /// that fails to decode fails the instance with `Error::Codec`.
    pub fn register_typed<In, Out, F, Fut>(mut self, name: impl Into<String>, f: F) -> Self
    where
        In: serde::de::DeserializeOwned + 'static,
        Out: serde::Serialize + 'static,
        F: Fn(OrchestrationContext, In) -> Fut + Send + Sync + Clone + 'static,
        Fut: Future<Output = Result<Out, Error>> + 'static,
    {
        let wrapper = move |ctx: OrchestrationContext, input_s: String| {
            let f_inner = f.clone();
            async move {
                let input: In = Json::decode(&input_s)?;
                let out: Out = f_inner(ctx, input).await?;
                Json::encode(&out)
            }
        };
        self.insert(name.into(), Arc::new(FnOrchestration(wrapper)));
        self
    }
}

impl ActivityRegistryBuilder {
    pub fn register<F, Fut>(mut self, name: impl Into<String>, f: F) -> Self
    where
        F: Fn(String) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<String, String>> + Send + 'static,
    {
        self.insert(name.into(), Arc::new(FnActivity(f)));
        self
    }

    /// Register with JSON-decoded input and JSON-encoded output. Codec
    /// failures are reported as activity errors.
    pub fn register_typed<In, Out, F, Fut>(mut self, name: impl Into<String>, f: F) -> Self
    where
        In: serde::de::DeserializeOwned + Send + 'static,
        Out: serde::Serialize + Send + 'static,
        F: Fn(In) -> Fut + Send + Sync + Clone + 'static,
        Fut: Future<Output = Result<Out, String>> + Send + 'static,
    {
        let wrapper = move |input_s: String| {
            let f_inner = f.clone();
            async move {
                let input: In = Json::decode(&input_s).map_err(|e| e.to_string())?;
                let out: Out = f_inner(input).await?;
                Json::encode(&out).map_err(|e| e.to_string())
            }
        };
        self.insert(name.into(), Arc::new(FnActivity(wrapper)));
        self
    }
}
