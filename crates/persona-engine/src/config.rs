use std::env;

pub const DEFAULT_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";
pub const DEFAULT_REQUEST_TIMEOUT_S: f64 = 90.0;
const REQUEST_TIMEOUT_RANGE_S: (f64, f64) = (15.0, 300.0);

#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    pub api_key: Option<String>,
    pub api_base: String,
    pub text_model: Option<String>,
    pub image_model: Option<String>,
    pub request_timeout_s: f64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            api_base: DEFAULT_API_BASE.to_string(),
            text_model: None,
            image_model: None,
            request_timeout_s: DEFAULT_REQUEST_TIMEOUT_S,
        }
    }
}

impl EngineConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(non_empty_env)
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let read = |key: &str| {
            lookup(key)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };
        Self {
            api_key: read("GEMINI_API_KEY")
                .or_else(|| read("GOOGLE_API_KEY"))
                .or_else(|| read("API_KEY")),
            api_base: read("GEMINI_API_BASE")
                .map(|value| value.trim_end_matches('/').to_string())
                .unwrap_or_else(|| DEFAULT_API_BASE.to_string()),
            text_model: read("PERSONA_TEXT_MODEL"),
            image_model: read("PERSONA_IMAGE_MODEL"),
            request_timeout_s: clamp_timeout(
                read("PERSONA_REQUEST_TIMEOUT").and_then(|value| value.parse::<f64>().ok()),
            ),
        }
    }

    /// Applies command-line overrides on top of the environment.
    pub fn with_overrides(
        mut self,
        text_model: Option<String>,
        image_model: Option<String>,
        request_timeout_s: Option<f64>,
    ) -> Self {
        if text_model.is_some() {
            self.text_model = text_model;
        }
        if image_model.is_some() {
            self.image_model = image_model;
        }
        if request_timeout_s.is_some() {
            self.request_timeout_s = clamp_timeout(request_timeout_s);
        }
        self
    }
}

fn clamp_timeout(raw: Option<f64>) -> f64 {
    let (min, max) = REQUEST_TIMEOUT_RANGE_S;
    raw.filter(|value| value.is_finite())
        .map(|value| value.clamp(min, max))
        .unwrap_or(DEFAULT_REQUEST_TIMEOUT_S)
}

fn non_empty_env(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn config_from(pairs: &[(&str, &str)]) -> EngineConfig {
        let vars = pairs
            .iter()
            .map(|(key, value)| (key.to_string(), value.to_string()))
            .collect::<HashMap<String, String>>();
        EngineConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn empty_environment_uses_defaults() {
        assert_eq!(config_from(&[]), EngineConfig::default());
    }

    #[test]
    fn api_key_falls_through_aliases_skipping_blanks() {
        let config = config_from(&[
            ("GEMINI_API_KEY", "  "),
            ("GOOGLE_API_KEY", "g-key"),
            ("API_KEY", "a-key"),
        ]);
        assert_eq!(config.api_key.as_deref(), Some("g-key"));
        let config = config_from(&[("API_KEY", "a-key")]);
        assert_eq!(config.api_key.as_deref(), Some("a-key"));
    }

    #[test]
    fn timeout_is_clamped_and_garbage_ignored() {
        assert_eq!(
            config_from(&[("PERSONA_REQUEST_TIMEOUT", "5")]).request_timeout_s,
            15.0
        );
        assert_eq!(
            config_from(&[("PERSONA_REQUEST_TIMEOUT", "1000")]).request_timeout_s,
            300.0
        );
        assert_eq!(
            config_from(&[("PERSONA_REQUEST_TIMEOUT", "soon")]).request_timeout_s,
            DEFAULT_REQUEST_TIMEOUT_S
        );
    }

    #[test]
    fn overrides_replace_only_given_values() {
        let config = config_from(&[
            ("PERSONA_TEXT_MODEL", "gemini-2.5-flash"),
            ("PERSONA_IMAGE_MODEL", "gemini-3-pro-image-preview"),
            ("GEMINI_API_BASE", "http://localhost:8080/v1beta/"),
        ])
        .with_overrides(Some("dryrun-text-1".to_string()), None, Some(120.0));
        assert_eq!(config.text_model.as_deref(), Some("dryrun-text-1"));
        assert_eq!(config.image_model.as_deref(), Some("gemini-3-pro-image-preview"));
        assert_eq!(config.api_base, "http://localhost:8080/v1beta");
        assert_eq!(config.request_timeout_s, 120.0);
    }
}
