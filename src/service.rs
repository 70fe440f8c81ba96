//! Named operations on top of a [`SessionHandle`].
//!
//! An [`Operations`] table maps a caller-chosen key to a display name and a
//! route. Calling by key derives the loading text (`"{name}..."`) and the
//! failure alert (`"{name} failed:\n{message}"`) from the name, so every
//! feature module gets consistent user-facing text for free.

use std::collections::HashMap;
use std::time::Duration;

use serde_json::Value;
use tracing::{debug, error};

use crate::config::RequestOptions;
use crate::error::{ErrorInfo, SessionError};
use crate::registry::RequestKey;
use crate::runtime::SessionHandle;

pub const WAIT_TEXT_FORMAT: &str = "{name}...";
pub const FAIL_TEXT_FORMAT: &str = "{name} failed:\n{message}";

#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("unknown operation `{0}`")]
    UnknownOperation(String),
    #[error(transparent)]
    Session(#[from] SessionError),
    #[error("{0}")]
    Failed(ErrorInfo),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Operation {
    pub name: String,
    pub route: String,
    pub requires_identity: bool,
    pub fire_and_forget: bool,
}

impl Operation {
    #[must_use]
    pub fn new(name: impl Into<String>, route: impl Into<String>) -> Self {
        Self { name: name.into(), route: route.into(), requires_identity: false, fire_and_forget: false }
    }

    #[must_use]
    pub fn with_identity(mut self) -> Self {
        self.requires_identity = true;
        self
    }

    #[must_use]
    pub fn fire_and_forget(mut self) -> Self {
        self.fire_and_forget = true;
        self
    }

    /// Options for this operation with the default text formats.
    #[must_use]
    pub fn options(&self) -> RequestOptions {
        self.options_with(WAIT_TEXT_FORMAT, FAIL_TEXT_FORMAT)
    }

    /// Options with custom formats. `{name}` is replaced by the operation
    /// name; `{message}` and `{code}` stay for the failure path.
    #[must_use]
    pub fn options_with(&self, wait_format: &str, fail_format: &str) -> RequestOptions {
        let mut options = RequestOptions::new()
            .wait_text(wait_format.replace("{name}", &self.name))
            .fail_text(fail_format.replace("{name}", &self.name));
        options.requires_identity = self.requires_identity;
        options.fire_and_forget = self.fire_and_forget;
        options
    }
}

#[derive(Clone, Debug, Default)]
pub struct Operations {
    entries: HashMap<String, Operation>,
}

impl Operations {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an operation under `key`. A later add for the same key wins.
    #[must_use]
    pub fn add(mut self, key: impl Into<String>, operation: Operation) -> Self {
        self.insert(key, operation);
        self
    }

    pub fn insert(&mut self, key: impl Into<String>, operation: Operation) {
        let key = key.into();
        debug!(%key, route = %operation.route, "service: operation added");
        self.entries.insert(key, operation);
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Operation> {
        self.entries.get(key)
    }

    /// # Errors
    ///
    /// Returns [`ServiceError::UnknownOperation`] for an unregistered key.
    pub fn lookup(&self, key: &str) -> Result<&Operation, ServiceError> {
        self.get(key).ok_or_else(|| {
            error!(%key, "service: operation not found");
            ServiceError::UnknownOperation(key.to_owned())
        })
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// A session handle plus the operation table a feature module uses.
#[derive(Clone)]
pub struct Service {
    handle: SessionHandle,
    operations: Operations,
}

impl Service {
    #[must_use]
    pub fn new(handle: SessionHandle, operations: Operations) -> Self {
        Self { handle, operations }
    }

    #[must_use]
    pub fn handle(&self) -> &SessionHandle {
        &self.handle
    }

    #[must_use]
    pub fn operations(&self) -> &Operations {
        &self.operations
    }

    /// Run an operation with callbacks. Returns the request key, or `None`
    /// for a fire-and-forget operation (whose callbacks never run).
    ///
    /// # Errors
    ///
    /// Returns [`ServiceError::UnknownOperation`] or the session's refusal.
    pub async fn request(
        &self,
        key: &str,
        payload: Value,
        on_success: impl FnOnce(Value) + Send + 'static,
        on_error: impl FnOnce(ErrorInfo) + Send + 'static,
    ) -> Result<Option<RequestKey>, ServiceError> {
        let operation = self.operations.lookup(key)?;
        let options = operation.options();
        if operation.fire_and_forget {
            self.handle.send(&operation.route, payload, options).await?;
            return Ok(None);
        }
        let key = self
            .handle
            .enqueue(&operation.route, payload, on_success, on_error, options)
            .await?;
        Ok(Some(key))
    }

    /// Run an operation and await its result.
    ///
    /// # Errors
    ///
    /// Returns [`ServiceError::Failed`] with the server or client error.
    pub async fn call(&self, key: &str, payload: Value) -> Result<Value, ServiceError> {
        let operation = self.operations.lookup(key)?;
        self.handle
            .call(&operation.route, payload, operation.options())
            .await
            .map_err(ServiceError::Failed)
    }

    /// [`Service::call`] with a deadline.
    ///
    /// # Errors
    ///
    /// As [`Service::call`]; a timeout is a [`ServiceError::Failed`].
    pub async fn call_timeout(&self, key: &str, payload: Value, timeout: Duration) -> Result<Value, ServiceError> {
        let operation = self.operations.lookup(key)?;
        self.handle
            .call_timeout(&operation.route, payload, operation.options(), timeout)
            .await
            .map_err(ServiceError::Failed)
    }
}

#[cfg(test)]
#[path = "service_test.rs"]
mod tests;
