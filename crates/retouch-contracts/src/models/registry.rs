use indexmap::IndexMap;

/// Image-in, image-out editing.
pub const CAPABILITY_EDIT: &str = "edit";
/// Image-in, text-out description.
pub const CAPABILITY_DESCRIBE: &str = "describe";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelSpec {
    pub name: String,
    pub provider: String,
    pub capabilities: Vec<String>,
}

impl ModelSpec {
    pub fn supports(&self, capability: &str) -> bool {
        self.capabilities.iter().any(|item| item == capability)
    }
}

#[derive(Debug, Clone)]
pub struct ModelRegistry {
    models: IndexMap<String, ModelSpec>,
}

impl ModelRegistry {
    pub fn new(models: Option<IndexMap<String, ModelSpec>>) -> Self {
        Self {
            models: models.unwrap_or_else(default_models),
        }
    }

    pub fn get(&self, name: &str) -> Option<&ModelSpec> {
        self.models.get(name)
    }

    pub fn list(&self) -> impl Iterator<Item = &ModelSpec> {
        self.models.values()
    }

    /// Models supporting `capability`, in registration order.
    pub fn by_capability(&self, capability: &str) -> Vec<ModelSpec> {
        self.models
            .values()
            .filter(|model| model.supports(capability))
            .cloned()
            .collect()
    }

    pub fn ensure(&self, name: &str, capability: &str) -> Option<ModelSpec> {
        let model = self.get(name)?;
        if model.supports(capability) {
            return Some(model.clone());
        }
        None
    }
}

fn default_models() -> IndexMap<String, ModelSpec> {
    let mut map = IndexMap::new();

    let mut insert = |name: &str, provider: &str, capabilities: &[&str]| {
        map.insert(
            name.to_string(),
            ModelSpec {
                name: name.to_string(),
                provider: provider.to_string(),
                capabilities: capabilities
                    .iter()
                    .map(|item| (*item).to_string())
                    .collect(),
            },
        );
    };

    insert("gemini-2.5-flash-image", "gemini", &[CAPABILITY_EDIT]);
    insert("gemini-2.5-flash", "gemini", &[CAPABILITY_DESCRIBE]);
    insert("gemini-3-pro-image-preview", "gemini", &[CAPABILITY_EDIT]);
    insert("dryrun-edit-1", "dryrun", &[CAPABILITY_EDIT]);
    insert("dryrun-text-1", "dryrun", &[CAPABILITY_DESCRIBE]);

    map
}

#[cfg(test)]
mod tests {
    use super::{ModelRegistry, CAPABILITY_DESCRIBE, CAPABILITY_EDIT};

    #[test]
    fn default_registry_prefers_gemini_for_each_capability() {
        let registry = ModelRegistry::new(None);
        let edit = registry.by_capability(CAPABILITY_EDIT);
        assert_eq!(edit[0].name, "gemini-2.5-flash-image");
        let describe = registry.by_capability(CAPABILITY_DESCRIBE);
        assert_eq!(describe[0].name, "gemini-2.5-flash");
    }

    #[test]
    fn ensure_rejects_model_without_capability() {
        let registry = ModelRegistry::new(None);
        assert!(registry
            .ensure("dryrun-text-1", CAPABILITY_EDIT)
            .is_none());
        assert_eq!(
            registry
                .ensure("dryrun-edit-1", CAPABILITY_EDIT)
                .map(|model| model.provider),
            Some("dryrun".to_string())
        );
    }
}
