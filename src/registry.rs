//! Message-type registry — one-time initialization of auxiliary types
//!
//! Subscribers may receive bodies that embed generic "any"-typed
//! sub-messages. Before dispatch, each type a subscriber declares in
//! [`Subscriber::uses`](crate::subscriber::Subscriber::uses) is registered
//! with the polymorphic message registry exactly once per process.

use crate::error::{EventError, Result};
use std::collections::HashSet;
use std::sync::{Mutex, RwLock};

/// Polymorphic message registry
///
/// Registers a zero-value instance of the named type so generic fields
/// can later be resolved to it by name.
pub trait MessageRegistry: Send + Sync {
    fn initialize(&self, type_name: &str) -> Result<()>;
}

/// Registers each type with a [`MessageRegistry`] at most once
///
/// Check-and-register happens under one lock, so concurrent first use of
/// the same type from several delivery tasks still registers it once.
pub struct TypeInitializer {
    registry: Box<dyn MessageRegistry>,
    initialized: Mutex<HashSet<String>>,
}

impl TypeInitializer {
    pub fn new(registry: impl MessageRegistry + 'static) -> Self {
        Self {
            registry: Box::new(registry),
            initialized: Mutex::new(HashSet::new()),
        }
    }

    /// Initialize every type in `uses` not seen before
    ///
    /// Returns how many types were newly registered.
    pub fn initialize_uses<I, S>(&self, uses: I) -> Result<usize>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut initialized = self.initialized.lock().map_err(|e| {
            EventError::Registry(format!("type initializer lock poisoned: {}", e))
        })?;

        let mut added = 0;
        for type_name in uses {
            let type_name = type_name.as_ref();
            if initialized.contains(type_name) {
                continue;
            }
            self.registry.initialize(type_name)?;
            initialized.insert(type_name.to_string());
            added += 1;
            tracing::debug!(type_name = %type_name, "Message type initialized");
        }

        Ok(added)
    }

    pub fn is_initialized(&self, type_name: &str) -> Result<bool> {
        self.initialized
            .lock()
            .map(|set| set.contains(type_name))
            .map_err(|e| EventError::Registry(format!("type initializer lock poisoned: {}", e)))
    }
}

impl Default for TypeInitializer {
    fn default() -> Self {
        Self::new(MemoryMessageRegistry::default())
    }
}

/// In-memory registry for development and testing
///
/// Optionally restricted to a closed set of known type names; records every
/// `initialize` call.
#[derive(Default)]
pub struct MemoryMessageRegistry {
    known: Option<HashSet<String>>,
    calls: RwLock<Vec<String>>,
}

impl MemoryMessageRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Accept only the listed type names
    pub fn with_known<I, S>(types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            known: Some(types.into_iter().map(Into::into).collect()),
            calls: RwLock::new(Vec::new()),
        }
    }

    /// Every `initialize` call so far, in order
    pub fn calls(&self) -> Vec<String> {
        self.calls.read().map(|c| c.clone()).unwrap_or_default()
    }
}

impl MessageRegistry for MemoryMessageRegistry {
    fn initialize(&self, type_name: &str) -> Result<()> {
        if let Some(known) = &self.known {
            if !known.contains(type_name) {
                return Err(EventError::InvalidType(type_name.to_string()));
            }
        }

        self.calls
            .write()
            .map_err(|e| EventError::Registry(format!("registry lock poisoned: {}", e)))?
            .push(type_name.to_string());
        Ok(())
    }
}

impl<R: MessageRegistry + ?Sized> MessageRegistry for std::sync::Arc<R> {
    fn initialize(&self, type_name: &str) -> Result<()> {
        (**self).initialize(type_name)
    }
}
