pub mod config;
pub mod gallery;
pub mod gemini;
pub mod orchestrator;
pub mod portrait;
pub mod profile;

use std::sync::Arc;

use anyhow::{Context, Result};
use persona_contracts::events::EventWriter;
use persona_contracts::models::{Capability, ModelSelection, ModelSelector};
use persona_contracts::providers::ProviderRegistry;
use serde_json::{json, Value};

pub use config::EngineConfig;
pub use gallery::{CharacterPatch, GalleryStore, PatchOutcome};
pub use orchestrator::{
    failure_message, GenerationOrchestrator, GenerationUpdate, RequestId, RequestState,
    DEFAULT_FAILURE_MESSAGE,
};

use crate::gemini::GeminiClient;
use crate::portrait::{DryrunImageProvider, GeminiImageProvider, ImageProvider};
use crate::profile::{DryrunProfileProvider, GeminiProfileProvider, ProfileProvider};

pub fn default_profile_providers(
    client: Arc<GeminiClient>,
) -> ProviderRegistry<dyn ProfileProvider> {
    let mut providers: ProviderRegistry<dyn ProfileProvider> = ProviderRegistry::new();
    providers.register(Arc::new(GeminiProfileProvider::new(client)));
    providers.register(Arc::new(DryrunProfileProvider));
    providers
}

pub fn default_image_providers(
    client: Arc<GeminiClient>,
) -> ProviderRegistry<dyn ImageProvider> {
    let mut providers: ProviderRegistry<dyn ImageProvider> = ProviderRegistry::new();
    providers.register(Arc::new(GeminiImageProvider::new(client)));
    providers.register(Arc::new(DryrunImageProvider));
    providers
}

/// Resolves models from `config`, picks the matching providers and records
/// the session start.
pub fn build_orchestrator(
    config: &EngineConfig,
    events: EventWriter,
) -> Result<GenerationOrchestrator> {
    let selector = ModelSelector::new(None);
    let text = select_model(&selector, config.text_model.as_deref(), Capability::Text)?;
    let image = select_model(&selector, config.image_model.as_deref(), Capability::Image)?;

    let client = Arc::new(GeminiClient::new(config));
    let profile_provider = default_profile_providers(Arc::clone(&client))
        .get(&text.model.provider)
        .with_context(|| format!("no text provider named '{}'", text.model.provider))?;
    let image_provider = default_image_providers(client)
        .get(&image.model.provider)
        .with_context(|| format!("no image provider named '{}'", image.model.provider))?;

    for selection in [&text, &image] {
        if let Some(reason) = selection.fallback_reason.as_deref() {
            emit(&events, "model_fallback", json!({ "reason": reason }))?;
        }
    }
    emit(
        &events,
        "session_started",
        json!({
            "text_model": text.model.name,
            "image_model": image.model.name,
            "api_key_present": config.api_key.is_some(),
        }),
    )?;

    Ok(GenerationOrchestrator::new(
        profile_provider,
        image_provider,
        text.model.name,
        image.model.name,
        events,
    ))
}

fn select_model(
    selector: &ModelSelector,
    requested: Option<&str>,
    capability: Capability,
) -> Result<ModelSelection> {
    selector
        .select(requested, capability)
        .map_err(anyhow::Error::msg)
}

fn emit(events: &EventWriter, event_type: &str, payload: Value) -> Result<()> {
    events.emit(event_type, payload.as_object().cloned().unwrap_or_default())?;
    Ok(())
}
