//! The SAM template consumed by the emulator.
//!
//! Every function becomes an `AWS::Serverless::Function` resource keyed by its generated ID
//! and every route becomes an `HttpApi` event of that resource.
//! See https://github.com/aws/serverless-application-model/blob/develop/versions/2016-10-31.md

use crate::names::NameMapping;
use crate::types::{Functions, PLATFORM_TIMEOUT_SECS};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::Path;
use tracing::{debug, warn};

pub const TEMPLATE_FORMAT_VERSION: &str = "2010-09-09";
pub const TRANSFORM: &str = "AWS::Serverless-2016-10-31";
pub const FUNCTION_TYPE: &str = "AWS::Serverless::Function";
pub const EVENT_TYPE: &str = "HttpApi";
pub const PAYLOAD_FORMAT_VERSION: &str = "2.0";

/// Must match the function timeout, otherwise the route either truncates every call
/// or waits for a function that was already stopped.
pub const EVENT_TIMEOUT_MILLIS: u32 = PLATFORM_TIMEOUT_SECS * 1000;

/// The file name of the template inside the working directory.
pub const TEMPLATE_FILE_NAME: &str = "template.yml";

#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub struct Template {
    #[serde(rename = "AWSTemplateFormatVersion")]
    pub format_version: &'static str,
    pub transform: &'static str,
    pub resources: BTreeMap<String, Resource>,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub struct Resource {
    #[serde(rename = "Type")]
    pub kind: &'static str,
    pub properties: FunctionProperties,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub struct FunctionProperties {
    /// `<generated id>/<handler>` because the artifact is unpacked into a directory named after the ID
    pub handler: String,
    /// The logical key, so the function can still be recognized in the emulator logs
    pub description: String,
    pub runtime: String,
    pub memory_size: u32,
    pub timeout: u32,
    pub environment: Environment,
    pub events: BTreeMap<String, Event>,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub struct Environment {
    pub variables: BTreeMap<String, String>,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub struct Event {
    #[serde(rename = "Type")]
    pub kind: &'static str,
    pub properties: EventProperties,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub struct EventProperties {
    pub path: String,
    pub method: String,
    pub timeout_in_millis: u32,
    pub payload_format_version: &'static str,
}

impl Template {
    /// Builds the template for all `functions`, using the IDs from `names`.
    /// Functions without routes are still deployed, but cannot be reached via the HTTP API.
    pub fn build(functions: &Functions, names: &NameMapping) -> Self {
        let mut resources = BTreeMap::new();

        for (key, desc) in functions {
            // the mapping is generated from the same list, so a missing key is a bug in the caller
            let id = match names.id_of(key) {
                Some(v) => v,
                None => {
                    warn!("No ID was generated for {key}. The function is skipped.");
                    continue;
                }
            };

            let events = desc
                .route_events()
                .into_iter()
                .map(|(name, path)| {
                    let event = Event {
                        kind: EVENT_TYPE,
                        properties: EventProperties {
                            path,
                            method: desc.method().to_owned(),
                            timeout_in_millis: EVENT_TIMEOUT_MILLIS,
                            payload_format_version: PAYLOAD_FORMAT_VERSION,
                        },
                    };
                    (name, event)
                })
                .collect::<BTreeMap<_, _>>();

            if events.is_empty() {
                warn!("{key} has neither `route` nor `routes`. It will not be reachable via the HTTP API.");
            }

            debug!("{key} -> {id}, {} route(s)", events.len());

            resources.insert(
                id.to_owned(),
                Resource {
                    kind: FUNCTION_TYPE,
                    properties: FunctionProperties {
                        handler: format!("{id}/{}", desc.handler),
                        description: key.clone(),
                        runtime: desc.runtime.clone(),
                        memory_size: desc.memory_size(),
                        timeout: PLATFORM_TIMEOUT_SECS,
                        environment: Environment {
                            variables: desc.environment.clone(),
                        },
                        events,
                    },
                },
            );
        }

        Self {
            format_version: TEMPLATE_FORMAT_VERSION,
            transform: TRANSFORM,
            resources,
        }
    }

    pub fn to_yaml(&self) -> Result<String, serde_yaml::Error> {
        serde_yaml::to_string(self)
    }

    /// Writes the template as `template.yml` into `dir` and returns the full path to the file.
    pub fn write_to(&self, dir: &Path) -> crate::Result<std::path::PathBuf> {
        let path = dir.join(TEMPLATE_FILE_NAME);
        std::fs::write(&path, self.to_yaml()?)?;
        debug!("Template written to {}", path.display());
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::FunctionDescription;

    fn build(functions: &Functions) -> (Template, NameMapping) {
        let names = NameMapping::generate(functions);
        (Template::build(functions, &names), names)
    }

    fn resource<'a>(template: &'a Template, names: &NameMapping, key: &str) -> &'a Resource {
        &template.resources[names.id_of(key).unwrap()]
    }

    #[test]
    fn single_route_becomes_api_event() {
        let mut functions = Functions::new();
        functions.insert(
            "greet".to_owned(),
            FunctionDescription::new("fn.zip", "index.handler", "nodejs18.x")
                .with_route("/hello")
                .with_method("GET"),
        );
        let (template, names) = build(&functions);

        let events = &resource(&template, &names, "greet").properties.events;
        assert_eq!(events.len(), 1);
        let api = &events["Api"];
        assert_eq!(api.kind, "HttpApi");
        assert_eq!(api.properties.path, "/hello");
        assert_eq!(api.properties.method, "GET");
        assert_eq!(api.properties.payload_format_version, "2.0");
    }

    #[test]
    fn named_routes_become_one_event_each() {
        let mut functions = Functions::new();
        functions.insert(
            "users".to_owned(),
            FunctionDescription::new("users.zip", "main.handler", "python3.12")
                .with_named_route("List", "/users")
                .with_named_route("Get", "/users/{id}")
                .with_named_route("Me", "/me"),
        );
        let (template, names) = build(&functions);

        let events = &resource(&template, &names, "users").properties.events;
        assert_eq!(events.len(), 3);
        assert_eq!(events["List"].properties.path, "/users");
        assert_eq!(events["Get"].properties.path, "/users/{id}");
        assert_eq!(events["Me"].properties.path, "/me");
        assert!(events.values().all(|e| e.properties.method == "any"));
    }

    #[test]
    fn function_without_routes_has_no_events() {
        let mut functions = Functions::new();
        functions.insert(
            "worker".to_owned(),
            FunctionDescription::new("worker.zip", "index.handler", "nodejs18.x"),
        );
        let (template, names) = build(&functions);

        assert!(resource(&template, &names, "worker").properties.events.is_empty());
    }

    #[test]
    fn timeouts_match_the_platform_ceiling() {
        let mut functions = Functions::new();
        functions.insert(
            "a".to_owned(),
            FunctionDescription::new("a.zip", "index.handler", "nodejs18.x").with_route("/a"),
        );
        functions.insert(
            "b".to_owned(),
            FunctionDescription::new("b.zip", "index.handler", "nodejs18.x")
                .with_named_route("One", "/one")
                .with_named_route("Two", "/two"),
        );
        let (template, _) = build(&functions);

        for resource in template.resources.values() {
            assert_eq!(resource.properties.timeout, 29);
            for event in resource.properties.events.values() {
                assert_eq!(event.properties.timeout_in_millis, 29000);
                assert_eq!(event.properties.timeout_in_millis, resource.properties.timeout * 1000);
            }
        }
    }

    #[test]
    fn handler_is_prefixed_with_the_id() {
        let mut functions = Functions::new();
        functions.insert(
            "greet".to_owned(),
            FunctionDescription::new("fn.zip", "index.handler", "nodejs18.x")
                .with_memory_size(512)
                .with_env("STAGE", "test"),
        );
        let (template, names) = build(&functions);
        let id = names.id_of("greet").unwrap();
        let props = &template.resources[id].properties;

        assert_eq!(props.handler, format!("{id}/index.handler"));
        assert_eq!(props.description, "greet");
        assert_eq!(props.runtime, "nodejs18.x");
        assert_eq!(props.memory_size, 512);
        assert_eq!(props.environment.variables["STAGE"], "test");
    }

    #[test]
    fn yaml_has_the_expected_shape() {
        let mut functions = Functions::new();
        functions.insert(
            "greet".to_owned(),
            FunctionDescription::new("fn.zip", "index.handler", "nodejs18.x").with_route("/hello"),
        );
        let (template, names) = build(&functions);
        let id = names.id_of("greet").unwrap();

        let yaml: serde_yaml::Value = serde_yaml::from_str(&template.to_yaml().unwrap()).unwrap();
        assert_eq!(yaml["AWSTemplateFormatVersion"].as_str(), Some("2010-09-09"));
        assert_eq!(yaml["Transform"].as_str(), Some("AWS::Serverless-2016-10-31"));

        let function = &yaml["Resources"][id];
        assert_eq!(function["Type"].as_str(), Some("AWS::Serverless::Function"));
        assert_eq!(function["Properties"]["MemorySize"].as_u64(), Some(128));
        assert_eq!(function["Properties"]["Timeout"].as_u64(), Some(29));
        assert!(function["Properties"]["Environment"]["Variables"].is_mapping());

        let api = &function["Properties"]["Events"]["Api"]["Properties"];
        assert_eq!(api["Path"].as_str(), Some("/hello"));
        assert_eq!(api["TimeoutInMillis"].as_u64(), Some(29000));
        // must stay a string, not a float
        assert_eq!(api["PayloadFormatVersion"].as_str(), Some("2.0"));
    }

    #[test]
    fn write_to_creates_template_yml() {
        let dir = tempfile::TempDir::new().unwrap();
        let template = Template::build(&Functions::new(), &NameMapping::default());

        let path = template.write_to(dir.path()).unwrap();
        assert_eq!(path, dir.path().join("template.yml"));
        assert!(std::fs::read_to_string(path).unwrap().contains("AWS::Serverless-2016-10-31"));
    }
}
