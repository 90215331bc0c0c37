//! Provider registry: resolves a request's provider selection to a port.

use crate::error::GenerationError;
use crate::provider::ProviderPort;
use crate::types::ProviderSelection;
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Clone, Default)]
pub struct ProviderRegistry {
    providers: HashMap<String, Arc<dyn ProviderPort>>,
    default: Option<String>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a provider under its own name. The first registration becomes the default.
    pub fn register(&mut self, provider: Arc<dyn ProviderPort>) {
        let name = provider.name().to_string();
        if self.default.is_none() {
            self.default = Some(name.clone());
        }
        self.providers.insert(name, provider);
    }

    pub fn with_provider(mut self, provider: Arc<dyn ProviderPort>) -> Self {
        self.register(provider);
        self
    }

    pub fn set_default(&mut self, name: &str) -> Result<(), GenerationError> {
        if !self.providers.contains_key(name) {
            return Err(GenerationError::ProviderNotConfigured(name.to_string()));
        }
        self.default = Some(name.to_string());
        Ok(())
    }

    pub fn default_name(&self) -> Option<&str> {
        self.default.as_deref()
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn ProviderPort>> {
        self.providers.get(name).cloned()
    }

    pub fn resolve(&self, selection: &ProviderSelection) -> Result<Arc<dyn ProviderPort>, GenerationError> {
        let name = match selection {
            ProviderSelection::Explicit(name) => name.as_str(),
            ProviderSelection::Default => self.default.as_deref().ok_or_else(|| {
                GenerationError::ProviderNotConfigured("no default provider".to_string())
            })?,
        };
        self.get(name)
            .ok_or_else(|| GenerationError::ProviderNotConfigured(name.to_string()))
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.providers.keys().cloned().collect();
        names.sort();
        names
    }
}
