use super::registry::{Capability, ModelRegistry, ModelSpec};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelSelection {
    pub model: ModelSpec,
    pub requested: Option<String>,
    pub fallback_reason: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ModelSelector {
    pub registry: ModelRegistry,
}

impl ModelSelector {
    pub fn new(registry: Option<ModelRegistry>) -> Self {
        Self {
            registry: registry.unwrap_or_else(|| ModelRegistry::new(None)),
        }
    }

    /// Resolves `requested` for `capability`, falling back to the registry
    /// default. A fallback away from an explicit request carries a reason.
    pub fn select(
        &self,
        requested: Option<&str>,
        capability: Capability,
    ) -> Result<ModelSelection, String> {
        let requested = requested
            .map(str::trim)
            .filter(|value| !value.is_empty());
        if let Some(name) = requested {
            if let Some(model) = self.registry.ensure(name, capability) {
                return Ok(ModelSelection {
                    model,
                    requested: Some(name.to_string()),
                    fallback_reason: None,
                });
            }
        }

        let Some(model) = self.registry.by_capability(capability).into_iter().next() else {
            return Err(format!("No models available for capability '{capability}'."));
        };
        Ok(ModelSelection {
            fallback_reason: requested.map(|name| {
                format!(
                    "Requested model '{name}' unavailable for capability '{capability}'; using '{}'.",
                    model.name
                )
            }),
            requested: requested.map(str::to_string),
            model,
        })
    }
}

#[cfg(test)]
mod tests {
    use indexmap::IndexMap;

    use super::*;

    #[test]
    fn explicit_request_is_honored() {
        let selection = ModelSelector::new(None)
            .select(Some("dryrun-text-1"), Capability::Text)
            .unwrap();
        assert_eq!(selection.model.provider, "dryrun");
        assert_eq!(selection.fallback_reason, None);
    }

    #[test]
    fn wrong_capability_falls_back_with_reason() {
        let selection = ModelSelector::new(None)
            .select(Some("gemini-3-flash-preview"), Capability::Image)
            .unwrap();
        assert_eq!(selection.model.name, "gemini-2.5-flash-image");
        assert_eq!(selection.requested.as_deref(), Some("gemini-3-flash-preview"));
        assert_eq!(
            selection.fallback_reason.as_deref(),
            Some("Requested model 'gemini-3-flash-preview' unavailable for capability 'image'; using 'gemini-2.5-flash-image'.")
        );
    }

    #[test]
    fn no_request_uses_default_silently() {
        let selection = ModelSelector::new(None)
            .select(Some("  "), Capability::Text)
            .unwrap();
        assert_eq!(selection.model.name, "gemini-3-flash-preview");
        assert_eq!(selection.requested, None);
        assert_eq!(selection.fallback_reason, None);
    }

    #[test]
    fn empty_capability_is_an_error() {
        let mut models = IndexMap::new();
        models.insert(
            "text-only".to_string(),
            ModelSpec::new("text-only", "dryrun", &[Capability::Text]),
        );
        let err = ModelSelector::new(Some(ModelRegistry::new(Some(models))))
            .select(None, Capability::Image)
            .unwrap_err();
        assert_eq!(err, "No models available for capability 'image'.");
    }
}
