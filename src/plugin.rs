//! Compile-time plugin registration.
//!
//! A [`Plugin`] creates objects from a [`FilterDescription`] (consisting of a numeric identifier, an optional name and client data).
//! It is used to implement the process-wide [filter](crate::dataset::filter) registry.
//!
//! Plugins are registered at compile time using the [inventory] crate.
//! At runtime, an identifier matching function is applied to find which registered plugin is associated with a filter description.
//! If a match is found, the plugin is created from the description.

use thiserror::Error;

use crate::dataset::filter::FilterDescription;

/// A plugin.
pub struct Plugin<TPlugin> {
    /// the identifier of the plugin.
    identifier: &'static str,
    /// Tests if the numeric filter identifier is a match for this plugin.
    match_id_fn: fn(id: u16) -> bool,
    /// Create an implementation of this plugin from a filter description.
    create_fn: fn(description: &FilterDescription) -> Result<TPlugin, PluginCreateError>,
}

/// An invalid plugin parameters error.
#[derive(Debug, Error)]
#[error("{plugin_type} {identifier} is unsupported with client data {client_data:?}")]
pub struct PluginParametersInvalidError {
    identifier: &'static str,
    plugin_type: &'static str,
    client_data: Vec<u32>,
}

impl PluginParametersInvalidError {
    /// Create a new [`PluginParametersInvalidError`].
    #[must_use]
    pub fn new(identifier: &'static str, plugin_type: &'static str, client_data: Vec<u32>) -> Self {
        Self {
            identifier,
            plugin_type,
            client_data,
        }
    }
}

/// A plugin creation error.
#[derive(Error, Debug)]
#[allow(missing_docs)]
pub enum PluginCreateError {
    /// An unsupported plugin.
    #[error("{plugin_type} {name} is not supported")]
    Unsupported { name: String, plugin_type: String },
    /// Invalid parameters.
    #[error(transparent)]
    ParametersInvalid(#[from] PluginParametersInvalidError),
    /// Other
    #[error("{_0}")]
    Other(String),
}

impl From<&str> for PluginCreateError {
    fn from(err_string: &str) -> Self {
        Self::Other(err_string.to_string())
    }
}

impl From<String> for PluginCreateError {
    fn from(err_string: String) -> Self {
        Self::Other(err_string)
    }
}

impl<TPlugin> Plugin<TPlugin> {
    /// Create a new plugin for registration.
    pub const fn new(
        identifier: &'static str,
        match_id_fn: fn(id: u16) -> bool,
        create_fn: fn(description: &FilterDescription) -> Result<TPlugin, PluginCreateError>,
    ) -> Self {
        Self {
            identifier,
            match_id_fn,
            create_fn,
        }
    }

    /// Create a `TPlugin` plugin from `description`.
    ///
    /// # Errors
    ///
    /// Returns a [`PluginCreateError`] if plugin creation fails due to either:
    ///  - the filter identifier being unregistered,
    ///  - or the client data is invalid.
    pub fn create(&self, description: &FilterDescription) -> Result<TPlugin, PluginCreateError> {
        (self.create_fn)(description)
    }

    /// Returns true if this plugin is associated with the numeric filter identifier `id`.
    #[must_use]
    pub fn match_id(&self, id: u16) -> bool {
        (self.match_id_fn)(id)
    }

    /// Returns the identifier of the plugin.
    #[must_use]
    pub const fn identifier(&self) -> &'static str {
        self.identifier
    }
}
