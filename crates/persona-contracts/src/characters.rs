use std::fmt;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use uuid::Uuid;

/// Korean-language designer persona sent with every profile request.
pub const PROFILE_SYSTEM_INSTRUCTION: &str = "\
당신은 세계적인 수준의 판타지/SF 캐릭터 디자이너이자 작가입니다.
사용자의 요청에 따라 매력적이고 독창적인 캐릭터 설정을 한국어로 생성해야 합니다.
캐릭터의 이름, 이명(Title), 성격, 배경 이야기, 능력치 등을 상세하게 작성하세요.
특히 'visualPrompt'는 이미지 생성 AI가 캐릭터의 초상화를 그릴 수 있도록 영어로 아주 상세하게 묘사해야 합니다 (외모, 복장, 조명, 스타일 등).";

pub const REQUIRED_PROFILE_FIELDS: [&str; 7] = [
    "name",
    "title",
    "shortDescription",
    "fullBackstory",
    "visualPrompt",
    "traits",
    "stats",
];

pub const PORTRAIT_STYLE_QUALIFIERS: &str = "character concept art, high quality, 4k, digital painting, detailed lighting, centered composition";

pub const PORTRAIT_ASPECT_RATIO: &str = "1:1";

pub const TRAIT_COUNT_RANGE: (usize, usize) = (3, 5);
pub const EXPECTED_STAT_COUNT: usize = 5;
pub const STAT_VALUE_MAX: f64 = 100.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CharacterId(Uuid);

impl CharacterId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for CharacterId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for CharacterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CharacterStat {
    pub label: String,
    pub value: f64,
}

/// Structured output of the profile stage: a character without identity,
/// timestamp or portrait.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CharacterProfile {
    pub name: String,
    pub title: String,
    pub short_description: String,
    pub full_backstory: String,
    pub visual_prompt: String,
    pub traits: Vec<String>,
    pub stats: Vec<CharacterStat>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedProfile {
    pub profile: CharacterProfile,
    pub warnings: Vec<String>,
}

impl CharacterProfile {
    /// Parses a model reply. Tolerates a fenced code block around the JSON.
    pub fn from_json_text(raw: &str) -> Result<Self> {
        let body = strip_code_fence(raw);
        if body.is_empty() {
            bail!("profile response was empty");
        }
        let value: Value =
            serde_json::from_str(body).context("profile response is not valid JSON")?;
        let Some(object) = value.as_object() else {
            bail!("profile response must be a JSON object");
        };
        let missing = REQUIRED_PROFILE_FIELDS
            .iter()
            .filter(|field| object.get(**field).map_or(true, Value::is_null))
            .copied()
            .collect::<Vec<&str>>();
        if !missing.is_empty() {
            bail!("profile response missing fields: {}", missing.join(", "));
        }
        serde_json::from_value(value).context("profile response does not match the character schema")
    }

    /// Trims text, clamps stats into range and reports cardinality drift.
    /// Empty required text is a schema violation.
    pub fn normalize(self) -> Result<NormalizedProfile> {
        let mut warnings = Vec::new();
        let name = required_text("name", &self.name)?;
        let title = required_text("title", &self.title)?;
        let short_description = required_text("shortDescription", &self.short_description)?;
        let full_backstory = required_text("fullBackstory", &self.full_backstory)?;
        let visual_prompt = required_text("visualPrompt", &self.visual_prompt)?;

        let traits = self
            .traits
            .iter()
            .map(|value| value.trim())
            .filter(|value| !value.is_empty())
            .map(str::to_string)
            .collect::<Vec<String>>();
        let (min_traits, max_traits) = TRAIT_COUNT_RANGE;
        if traits.len() < min_traits || traits.len() > max_traits {
            warnings.push(format!(
                "expected {min_traits}-{max_traits} traits, got {}",
                traits.len()
            ));
        }

        let mut stats = Vec::with_capacity(self.stats.len());
        for stat in self.stats {
            if !stat.value.is_finite() {
                bail!("stat '{}' has a non-finite value", stat.label);
            }
            let clamped = stat.value.clamp(0.0, STAT_VALUE_MAX);
            if clamped != stat.value {
                warnings.push(format!(
                    "stat '{}' value {} clamped to {}",
                    stat.label, stat.value, clamped
                ));
            }
            stats.push(CharacterStat {
                label: stat.label.trim().to_string(),
                value: clamped,
            });
        }
        if stats.len() != EXPECTED_STAT_COUNT {
            warnings.push(format!(
                "expected {EXPECTED_STAT_COUNT} stats, got {}",
                stats.len()
            ));
        }

        Ok(NormalizedProfile {
            profile: CharacterProfile {
                name,
                title,
                short_description,
                full_backstory,
                visual_prompt,
                traits,
                stats,
            },
            warnings,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Character {
    pub id: CharacterId,
    pub name: String,
    pub title: String,
    pub short_description: String,
    pub full_backstory: String,
    pub visual_prompt: String,
    pub traits: Vec<String>,
    pub stats: Vec<CharacterStat>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    pub created_at: i64,
}

impl Character {
    pub fn from_profile(id: CharacterId, profile: CharacterProfile, created_at: i64) -> Self {
        Self {
            id,
            name: profile.name,
            title: profile.title,
            short_description: profile.short_description,
            full_backstory: profile.full_backstory,
            visual_prompt: profile.visual_prompt,
            traits: profile.traits,
            stats: profile.stats,
            image_url: None,
            created_at,
        }
    }

    pub fn has_complete_profile(&self) -> bool {
        [
            &self.name,
            &self.title,
            &self.short_description,
            &self.full_backstory,
            &self.visual_prompt,
        ]
        .iter()
        .all(|value| !value.trim().is_empty())
    }

    pub fn has_image(&self) -> bool {
        self.image_url.is_some()
    }
}

/// Inline portrait bytes as returned by an image provider, still base64.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImagePayload {
    pub mime_type: String,
    pub data_base64: String,
}

impl ImagePayload {
    pub fn to_data_url(&self) -> String {
        format!("data:{};base64,{}", self.mime_type, self.data_base64)
    }

    pub fn from_data_url(url: &str) -> Option<Self> {
        let rest = url.strip_prefix("data:")?;
        let (mime_type, data) = rest.split_once(";base64,")?;
        if mime_type.is_empty() || data.is_empty() {
            return None;
        }
        Some(Self {
            mime_type: mime_type.to_string(),
            data_base64: data.to_string(),
        })
    }
}

pub fn portrait_prompt(visual_prompt: &str) -> String {
    format!("{}, {PORTRAIT_STYLE_QUALIFIERS}", visual_prompt.trim())
}

/// Response schema in the generative-language OpenAPI subset.
pub fn profile_response_schema() -> Value {
    json!({
        "type": "OBJECT",
        "properties": {
            "name": { "type": "STRING", "description": "캐릭터의 이름" },
            "title": { "type": "STRING", "description": "캐릭터의 이명 또는 직업 (예: 용의 기사)" },
            "shortDescription": { "type": "STRING", "description": "한 문장으로 요약한 캐릭터 소개" },
            "fullBackstory": { "type": "STRING", "description": "300자 내외의 상세한 배경 이야기" },
            "visualPrompt": {
                "type": "STRING",
                "description": "이미지 생성을 위한 영어 프롬프트 (High quality, detailed description)"
            },
            "traits": {
                "type": "ARRAY",
                "items": { "type": "STRING" },
                "description": "캐릭터의 성격 키워드 3~5개"
            },
            "stats": {
                "type": "ARRAY",
                "items": {
                    "type": "OBJECT",
                    "properties": {
                        "label": { "type": "STRING", "description": "능력치 이름 (예: 힘, 지능, 민첩, 운)" },
                        "value": { "type": "NUMBER", "description": "0에서 100 사이의 수치" }
                    },
                    "required": ["label", "value"]
                },
                "description": "캐릭터의 능력치 5개"
            }
        },
        "required": REQUIRED_PROFILE_FIELDS,
    })
}

fn required_text(field: &str, value: &str) -> Result<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        bail!("profile field '{field}' is empty");
    }
    Ok(trimmed.to_string())
}

fn strip_code_fence(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(inner) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let inner = inner.strip_prefix("json").unwrap_or(inner);
    inner.strip_suffix("```").unwrap_or(inner).trim()
}
