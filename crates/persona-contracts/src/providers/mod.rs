use std::sync::Arc;

pub trait NamedProvider {
    fn name(&self) -> &str;
}

/// Providers keyed by name, kept in registration order. Entries are shared so
/// worker threads can hold their own handle.
pub struct ProviderRegistry<T: NamedProvider + ?Sized> {
    providers: Vec<Arc<T>>,
}

impl<T: NamedProvider + ?Sized> Default for ProviderRegistry<T> {
    fn default() -> Self {
        Self {
            providers: Vec::new(),
        }
    }
}

impl<T: NamedProvider + ?Sized> ProviderRegistry<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `provider`, replacing an earlier entry with the same name.
    pub fn register(&mut self, provider: Arc<T>) {
        self.providers
            .retain(|existing| existing.name() != provider.name());
        self.providers.push(provider);
    }

    pub fn get(&self, name: &str) -> Option<Arc<T>> {
        self.providers
            .iter()
            .find(|provider| provider.name() == name)
            .cloned()
    }

    pub fn names(&self) -> Vec<String> {
        let mut names = self
            .providers
            .iter()
            .map(|provider| provider.name().to_string())
            .collect::<Vec<String>>();
        names.sort();
        names
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::{NamedProvider, ProviderRegistry};

    trait Greeter: NamedProvider {
        fn greet(&self) -> String;
    }

    struct Fixed {
        name: &'static str,
        greeting: &'static str,
    }

    impl NamedProvider for Fixed {
        fn name(&self) -> &str {
            self.name
        }
    }

    impl Greeter for Fixed {
        fn greet(&self) -> String {
            self.greeting.to_string()
        }
    }

    #[test]
    fn trait_objects_resolve_by_name() {
        let mut registry: ProviderRegistry<dyn Greeter> = ProviderRegistry::new();
        registry.register(Arc::new(Fixed {
            name: "gemini",
            greeting: "hi",
        }));
        registry.register(Arc::new(Fixed {
            name: "dryrun",
            greeting: "local",
        }));

        assert_eq!(registry.names(), vec!["dryrun", "gemini"]);
        assert_eq!(
            registry.get("dryrun").map(|provider| provider.greet()),
            Some("local".to_string())
        );
        assert!(registry.get("openai").is_none());
    }

    #[test]
    fn registering_same_name_replaces() {
        let mut registry: ProviderRegistry<dyn Greeter> = ProviderRegistry::new();
        registry.register(Arc::new(Fixed {
            name: "gemini",
            greeting: "old",
        }));
        registry.register(Arc::new(Fixed {
            name: "gemini",
            greeting: "new",
        }));
        assert_eq!(registry.names(), vec!["gemini"]);
        assert_eq!(
            registry.get("gemini").map(|provider| provider.greet()),
            Some("new".to_string())
        );
    }
}
