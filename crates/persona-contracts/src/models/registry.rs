use std::fmt;

use indexmap::IndexMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Capability {
    Text,
    Image,
}

impl Capability {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Image => "image",
        }
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelSpec {
    pub name: String,
    pub provider: String,
    pub capabilities: Vec<Capability>,
}

impl ModelSpec {
    pub fn new(name: &str, provider: &str, capabilities: &[Capability]) -> Self {
        Self {
            name: name.to_string(),
            provider: provider.to_string(),
            capabilities: capabilities.to_vec(),
        }
    }

    pub fn supports(&self, capability: Capability) -> bool {
        self.capabilities.contains(&capability)
    }
}

/// Known models in preference order; the first model per capability is the
/// default for that capability.
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
        self.models.get(canonical_model_name(name))
    }

    pub fn by_capability(&self, capability: Capability) -> Vec<ModelSpec> {
        self.models
            .values()
            .filter(|model| model.supports(capability))
            .cloned()
            .collect()
    }

    pub fn ensure(&self, name: &str, capability: Capability) -> Option<ModelSpec> {
        self.get(name)
            .filter(|model| model.supports(capability))
            .cloned()
    }
}

/// Strips the `models/` resource prefix and the `google/` vendor prefix.
pub fn canonical_model_name(raw: &str) -> &str {
    let trimmed = raw.trim();
    let trimmed = trimmed.strip_prefix("models/").unwrap_or(trimmed);
    trimmed.strip_prefix("google/").unwrap_or(trimmed)
}

fn default_models() -> IndexMap<String, ModelSpec> {
    [
        ModelSpec::new("gemini-3-flash-preview", "gemini", &[Capability::Text]),
        ModelSpec::new("gemini-2.5-flash", "gemini", &[Capability::Text]),
        ModelSpec::new("gemini-2.5-flash-image", "gemini", &[Capability::Image]),
        ModelSpec::new("gemini-3-pro-image-preview", "gemini", &[Capability::Image]),
        ModelSpec::new("dryrun-text-1", "dryrun", &[Capability::Text]),
        ModelSpec::new("dryrun-image-1", "dryrun", &[Capability::Image]),
    ]
    .into_iter()
    .map(|spec| (spec.name.clone(), spec))
    .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_lead_each_capability() {
        let registry = ModelRegistry::new(None);
        assert_eq!(
            registry.by_capability(Capability::Text)[0].name,
            "gemini-3-flash-preview"
        );
        assert_eq!(
            registry.by_capability(Capability::Image)[0].name,
            "gemini-2.5-flash-image"
        );
    }

    #[test]
    fn lookup_accepts_resource_and_vendor_prefixes() {
        let registry = ModelRegistry::new(None);
        assert!(registry.get("models/gemini-2.5-flash-image").is_some());
        assert!(registry.get("google/gemini-3-flash-preview").is_some());
        assert!(registry.get("gpt-image-1").is_none());
    }

    #[test]
    fn ensure_checks_capability() {
        let registry = ModelRegistry::new(None);
        assert!(registry
            .ensure("dryrun-image-1", Capability::Image)
            .is_some());
        assert!(registry.ensure("dryrun-image-1", Capability::Text).is_none());
    }
}
