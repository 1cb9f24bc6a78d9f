use crate::types::Functions;
use std::collections::BTreeMap;
use uuid::Uuid;

/// Maps `/<logical key>` to the generated identifier the emulator knows the function by.
/// Built once per session and never modified afterwards.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NameMapping {
    names: BTreeMap<String, String>,
}

impl NameMapping {
    /// Assigns a fresh identifier to every function in the list.
    pub fn generate(functions: &Functions) -> Self {
        let names = functions
            .keys()
            .map(|key| (format!("/{key}"), generate_id()))
            .collect();

        Self { names }
    }

    /// Returns the identifier for `/<logical key>`, e.g. `get("/greet")`.
    pub fn get(&self, route: &str) -> Option<&str> {
        self.names.get(route).map(String::as_str)
    }

    /// Same as [NameMapping::get], but takes the bare logical key, e.g. `id_of("greet")`.
    pub fn id_of(&self, key: &str) -> Option<&str> {
        self.get(&["/", key].concat())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.names.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

/// Resource logical IDs must be alphanumeric, so the UUID goes in without dashes.
/// The same value is used as the directory name for the unpacked artifact.
fn generate_id() -> String {
    format!("Function{}", Uuid::new_v4().simple())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::FunctionDescription;
    use std::collections::HashSet;

    fn functions(keys: &[&str]) -> Functions {
        keys.iter()
            .map(|k| (k.to_string(), FunctionDescription::new("fn.zip", "index.handler", "nodejs18.x")))
            .collect()
    }

    #[test]
    fn one_entry_per_key() {
        let names = NameMapping::generate(&functions(&["greet", "users", "orders"]));

        let keys: Vec<&str> = names.iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec!["/greet", "/orders", "/users"]);
        assert_eq!(names.id_of("greet"), names.get("/greet"));
        assert!(names.get("greet").is_none());
    }

    #[test]
    fn ids_are_unique_and_alphanumeric() {
        let keys: Vec<String> = (0..200).map(|i| format!("fn{i}")).collect();
        let keys: Vec<&str> = keys.iter().map(String::as_str).collect();
        let names = NameMapping::generate(&functions(&keys));

        let ids: HashSet<&str> = names.iter().map(|(_, v)| v).collect();
        assert_eq!(ids.len(), 200);
        assert!(ids.iter().all(|id| id.chars().all(|c| c.is_ascii_alphanumeric())));
    }

    #[test]
    fn empty_input_empty_mapping() {
        let names = NameMapping::generate(&Functions::new());
        assert!(names.is_empty());
        assert_eq!(names.len(), 0);
    }
}
