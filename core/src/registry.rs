//! Type name → factory table.
//!
//! The process entry point builds one registry, registers every module it links in,
//! and hands it to the orchestrator behind an `Arc`. There is no global table.

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::debug;

use crate::error::RegistryError;
use crate::module::{Module, ModuleMetadata};

pub type ModuleFactory = Arc<dyn Fn() -> Box<dyn Module> + Send + Sync>;

struct Entry {
    factory: ModuleFactory,
    metadata: ModuleMetadata,
}

#[derive(Default)]
pub struct ModuleRegistry {
    entries: BTreeMap<String, Entry>,
}

impl ModuleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a factory under `type_name`.
    ///
    /// The factory is called once here to capture the type's metadata. A second
    /// registration of the same name is a programming error and is refused.
    pub fn register<F>(&mut self, type_name: &str, factory: F) -> Result<(), RegistryError>
    where
        F: Fn() -> Box<dyn Module> + Send + Sync + 'static,
    {
        if self.entries.contains_key(type_name) {
            return Err(RegistryError::DuplicateModuleType(type_name.to_string()));
        }

        let metadata = factory().metadata().clone();
        debug!(module = type_name, version = %metadata.version, "registered module type");
        self.entries.insert(
            type_name.to_string(),
            Entry {
                factory: Arc::new(factory),
                metadata,
            },
        );
        Ok(())
    }

    pub fn create(&self, type_name: &str) -> Result<Box<dyn Module>, RegistryError> {
        self.entries
            .get(type_name)
            .map(|entry| (entry.factory)())
            .ok_or_else(|| RegistryError::UnknownModuleType(type_name.to_string()))
    }

    pub fn metadata(&self, type_name: &str) -> Result<&ModuleMetadata, RegistryError> {
        self.entries
            .get(type_name)
            .map(|entry| &entry.metadata)
            .ok_or_else(|| RegistryError::UnknownModuleType(type_name.to_string()))
    }

    pub fn contains(&self, type_name: &str) -> bool {
        self.entries.contains_key(type_name)
    }

    pub fn types(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl std::fmt::Debug for ModuleRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModuleRegistry")
            .field("types", &self.entries.keys().collect::<Vec<_>>())
            .finish()
    }
}

// ╔════════════════════════════════════════════╗
// ║ ████████╗███████╗███████╗████████╗███████╗ ║
// ║ ╚══██╔══╝██╔════╝██╔════╝╚══██╔══╝██╔════╝ ║
// ║    ██║   █████╗  ███████╗   ██║   ███████╗ ║
// ║    ██║   ██╔══╝  ╚════██║   ██║   ╚════██║ ║
// ║    ██║   ███████╗███████║   ██║   ███████║ ║
// ║    ╚═╝   ╚══════╝╚══════╝   ╚═╝   ╚══════╝ ║
// ╚════════════════════════════════════════════╝
