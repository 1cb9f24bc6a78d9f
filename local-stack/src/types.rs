use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Memory size used when the description does not set one, in MB.
pub const DEFAULT_MEMORY_SIZE: u32 = 128;

/// HTTP method used when the description does not set one.
pub const DEFAULT_METHOD: &str = "any";

/// The longest a function can run behind an HTTP API, in seconds.
/// Both the function timeout and the route timeout are derived from it so they always match.
pub const PLATFORM_TIMEOUT_SECS: u32 = 29;

/// Functions keyed by their logical key, e.g. `greet`.
pub type Functions = BTreeMap<String, FunctionDescription>;

/// A single packaged function and the routes it should be reachable on.
///
/// Can be deserialized from JSON, e.g.
/// ```json
/// { "filename": "fn.zip", "handler": "index.handler", "runtime": "nodejs18.x", "route": "/hello", "method": "GET" }
/// ```
#[derive(Deserialize, Serialize, Debug, Clone, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FunctionDescription {
    /// Path to the zip archive with the function code, relative to the session base directory
    pub filename: String,
    /// E.g. `index.handler`, relative to the root of the archive
    pub handler: String,
    /// E.g. `nodejs18.x`
    pub runtime: String,
    /// In MB, defaults to [DEFAULT_MEMORY_SIZE]
    #[serde(default)]
    pub memory_size: Option<u32>,
    /// A single route, exposed as the `Api` event. Takes precedence over `routes`.
    #[serde(default)]
    pub route: Option<String>,
    /// Named routes, one event per entry
    #[serde(default)]
    pub routes: Option<BTreeMap<String, String>>,
    /// Defaults to [DEFAULT_METHOD]
    #[serde(default)]
    pub method: Option<String>,
    #[serde(default)]
    pub environment: BTreeMap<String, String>,
}

impl FunctionDescription {
    pub fn new(filename: &str, handler: &str, runtime: &str) -> Self {
        Self {
            filename: filename.to_owned(),
            handler: handler.to_owned(),
            runtime: runtime.to_owned(),
            ..Default::default()
        }
    }

    pub fn with_route(mut self, route: &str) -> Self {
        self.route = Some(route.to_owned());
        self
    }

    pub fn with_named_route(mut self, name: &str, route: &str) -> Self {
        self.routes
            .get_or_insert_with(BTreeMap::new)
            .insert(name.to_owned(), route.to_owned());
        self
    }

    pub fn with_method(mut self, method: &str) -> Self {
        self.method = Some(method.to_owned());
        self
    }

    pub fn with_memory_size(mut self, memory_size: u32) -> Self {
        self.memory_size = Some(memory_size);
        self
    }

    pub fn with_env(mut self, name: &str, value: &str) -> Self {
        self.environment.insert(name.to_owned(), value.to_owned());
        self
    }

    /// Routes as `(event name, path)` pairs.
    /// A single `route` becomes the `Api` event, otherwise every entry of `routes` is used as is.
    /// Returns an empty list if neither is set.
    pub fn route_events(&self) -> Vec<(String, String)> {
        match (&self.route, &self.routes) {
            (Some(route), _) => vec![("Api".to_owned(), route.clone())],
            (None, Some(routes)) => routes.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
            (None, None) => Vec::new(),
        }
    }

    pub fn method(&self) -> &str {
        self.method.as_deref().unwrap_or(DEFAULT_METHOD)
    }

    pub fn memory_size(&self) -> u32 {
        self.memory_size.unwrap_or(DEFAULT_MEMORY_SIZE)
    }
}
