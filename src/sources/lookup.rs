//! Auxiliary lookups used while normalizing records.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

pub trait ContactDirectory: Send + Sync {
    fn display_name(&self, number: &str) -> Option<String>;
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AppInfo {
    pub label: String,
    /// Platform category code, when the package declares one.
    pub category: Option<i32>,
    pub is_system: bool,
}

pub trait AppCatalog: Send + Sync {
    fn app_info(&self, package: &str) -> Option<AppInfo>;
}

struct NoContacts;

impl ContactDirectory for NoContacts {
    fn display_name(&self, _number: &str) -> Option<String> {
        None
    }
}

struct NoApps;

impl AppCatalog for NoApps {
    fn app_info(&self, _package: &str) -> Option<AppInfo> {
        None
    }
}

/// Handles to the lookups, shared by every adapter.
#[derive(Clone)]
pub struct Lookups {
    contacts: Arc<dyn ContactDirectory>,
    apps: Arc<dyn AppCatalog>,
}

impl Lookups {
    pub fn new(contacts: Arc<dyn ContactDirectory>, apps: Arc<dyn AppCatalog>) -> Self {
        Self { contacts, apps }
    }

    pub fn contact_name(&self, number: &str) -> Option<String> {
        if number.is_empty() {
            return None;
        }
        self.contacts.display_name(number)
    }

    pub fn app_info(&self, package: &str) -> Option<AppInfo> {
        self.apps.app_info(package)
    }
}

impl Default for Lookups {
    fn default() -> Self {
        Self::new(Arc::new(NoContacts), Arc::new(NoApps))
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::collections::HashMap;

    use super::*;

    #[derive(Default)]
    pub struct FixedContacts(pub HashMap<String, String>);

    impl ContactDirectory for FixedContacts {
        fn display_name(&self, number: &str) -> Option<String> {
            self.0.get(number).cloned()
        }
    }

    #[derive(Default)]
    pub struct FixedApps(pub HashMap<String, AppInfo>);

    impl AppCatalog for FixedApps {
        fn app_info(&self, package: &str) -> Option<AppInfo> {
            self.0.get(package).cloned()
        }
    }

    pub fn lookups(contacts: &[(&str, &str)], apps: &[(&str, AppInfo)]) -> Lookups {
        let contacts = contacts
            .iter()
            .map(|(number, name)| (number.to_string(), name.to_string()))
            .collect();
        let apps = apps
            .iter()
            .map(|(package, info)| (package.to_string(), info.clone()))
            .collect();
        Lookups::new(Arc::new(FixedContacts(contacts)), Arc::new(FixedApps(apps)))
    }
}
