use std::sync::Arc;

use anyhow::{bail, Context, Result};
use persona_contracts::characters::{
    profile_response_schema, CharacterProfile, CharacterStat, NormalizedProfile,
    PROFILE_SYSTEM_INSTRUCTION,
};
use persona_contracts::providers::NamedProvider;
use serde_json::{json, Value};
use sha2::{Digest, Sha256};

use crate::gemini::{candidate_parts, GeminiClient};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProfileRequest {
    pub model: String,
    pub prompt: String,
}

pub trait ProfileProvider: NamedProvider + Send + Sync {
    fn generate_profile(&self, request: &ProfileRequest) -> Result<CharacterProfile>;
}

/// Runs a provider and applies profile normalization; any failure along the
/// way is a profile failure.
pub fn generate_normalized_profile(
    provider: &dyn ProfileProvider,
    request: &ProfileRequest,
) -> Result<NormalizedProfile> {
    if request.prompt.trim().is_empty() {
        bail!("character prompt is empty");
    }
    provider
        .generate_profile(request)
        .with_context(|| format!("{} profile generation failed", provider.name()))?
        .normalize()
        .context("generated profile violates the character schema")
}

pub struct GeminiProfileProvider {
    client: Arc<GeminiClient>,
}

impl GeminiProfileProvider {
    pub fn new(client: Arc<GeminiClient>) -> Self {
        Self { client }
    }

    fn build_payload(request: &ProfileRequest) -> Value {
        json!({
            "systemInstruction": {
                "parts": [{ "text": PROFILE_SYSTEM_INSTRUCTION }],
            },
            "contents": [{
                "role": "user",
                "parts": [{ "text": request.prompt }],
            }],
            "generationConfig": {
                "responseMimeType": "application/json",
                "responseSchema": profile_response_schema(),
            },
        })
    }

    /// Concatenates the answer text, skipping thought summaries.
    fn extract_text(response_payload: &Value) -> Result<String> {
        let text = candidate_parts(response_payload)
            .into_iter()
            .filter(|part| !part.get("thought").and_then(Value::as_bool).unwrap_or(false))
            .filter_map(|part| part.get("text").and_then(Value::as_str))
            .collect::<String>();
        if text.trim().is_empty() {
            bail!("No text response from Gemini.");
        }
        Ok(text)
    }
}

impl NamedProvider for GeminiProfileProvider {
    fn name(&self) -> &str {
        "gemini"
    }
}

impl ProfileProvider for GeminiProfileProvider {
    fn generate_profile(&self, request: &ProfileRequest) -> Result<CharacterProfile> {
        let payload = Self::build_payload(request);
        let response_payload = self.client.generate_content(&request.model, &payload)?;
        let text = Self::extract_text(&response_payload)?;
        CharacterProfile::from_json_text(&text)
    }
}

const DRYRUN_NAMES: [&str; 6] = ["레오", "세라", "카이", "루나", "도윤", "미르"];
const DRYRUN_TRAITS: [&str; 8] = [
    "용감함", "호기심", "냉철함", "다정함", "고집", "유머", "신중함", "충성심",
];
const DRYRUN_STAT_LABELS: [&str; 5] = ["힘", "지능", "민첩", "체력", "운"];

/// Deterministic local profiles derived from a prompt digest.
pub struct DryrunProfileProvider;

impl NamedProvider for DryrunProfileProvider {
    fn name(&self) -> &str {
        "dryrun"
    }
}

impl ProfileProvider for DryrunProfileProvider {
    fn generate_profile(&self, request: &ProfileRequest) -> Result<CharacterProfile> {
        let concept = request.prompt.trim();
        let digest = Sha256::digest(concept.as_bytes());
        let tag = hex::encode(&digest[..4]);
        let name = DRYRUN_NAMES[digest[0] as usize % DRYRUN_NAMES.len()];
        let trait_start = digest[1] as usize % DRYRUN_TRAITS.len();
        let traits = (0..3)
            .map(|offset| DRYRUN_TRAITS[(trait_start + offset) % DRYRUN_TRAITS.len()].to_string())
            .collect();
        let stats = DRYRUN_STAT_LABELS
            .iter()
            .enumerate()
            .map(|(idx, label)| CharacterStat {
                label: label.to_string(),
                value: f64::from(digest[2 + idx] % 101),
            })
            .collect();

        Ok(CharacterProfile {
            name: name.to_string(),
            title: format!("{concept}의 화신"),
            short_description: format!("'{concept}'에서 태어난 캐릭터."),
            full_backstory: format!(
                "{name}은(는) '{concept}'라는 한 줄의 상상에서 시작되었다. 기록 번호 {tag}."
            ),
            visual_prompt: format!(
                "character portrait #{tag}, fantasy hero, expressive face, ornate costume"
            ),
            traits,
            stats,
        })
    }
}
