use std::fmt::Write as _;

use persona_contracts::characters::{Character, STAT_VALUE_MAX};
use persona_engine::GalleryStore;

const CARD_TRAIT_LIMIT: usize = 3;
const STAT_BAR_WIDTH: usize = 20;

pub fn gallery(gallery: &GalleryStore) -> String {
    if gallery.is_empty() {
        return "아직 생성된 캐릭터가 없습니다.\n프롬프트를 입력하여 첫 번째 캐릭터를 만들어보세요.".to_string();
    }
    let mut out = format!("최근 생성된 캐릭터 ({} characters)\n", gallery.len());
    for (idx, character) in gallery.characters().iter().enumerate() {
        out.push('\n');
        out.push_str(&card(idx + 1, character));
    }
    out
}

pub fn card(number: usize, character: &Character) -> String {
    let portrait = if character.has_image() {
        "portrait ready"
    } else {
        "no portrait"
    };
    let mut out = format!(
        "[{number}] {} · {} ({portrait})\n    {}\n",
        character.name, character.title, character.short_description
    );
    let tags = character
        .traits
        .iter()
        .take(CARD_TRAIT_LIMIT)
        .map(|value| format!("#{value}"))
        .collect::<Vec<String>>();
    if !tags.is_empty() {
        let _ = writeln!(out, "    {}", tags.join(" "));
    }
    out
}

pub fn detail(character: &Character) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "{}", character.title);
    let _ = writeln!(out, "{}", character.name);
    let _ = writeln!(out, "{}", character.short_description);
    if !character.traits.is_empty() {
        let _ = writeln!(out, "\n특성: {}", character.traits.join(", "));
    }
    let _ = writeln!(out, "\n배경 이야기\n{}", character.full_backstory);
    if !character.stats.is_empty() {
        let _ = writeln!(out, "\n능력치");
        let label_width = character
            .stats
            .iter()
            .map(|stat| stat.label.chars().count())
            .max()
            .unwrap_or(0);
        for stat in &character.stats {
            let pad = label_width - stat.label.chars().count();
            let _ = writeln!(
                out,
                "  {}{} {}",
                stat.label,
                " ".repeat(pad),
                stat_bar(stat.value)
            );
        }
    }
    let portrait = match character.image_url.as_deref() {
        Some(url) => format!("{} chars of inline image data", url.len()),
        None => "not available".to_string(),
    };
    let _ = writeln!(out, "\nportrait: {portrait}");
    let _ = writeln!(out, "visual prompt: \"{}\"", character.visual_prompt);
    let _ = writeln!(out, "id: {}", character.id);
    out
}

pub fn stat_bar(value: f64) -> String {
    let clamped = value.clamp(0.0, STAT_VALUE_MAX);
    let filled = ((clamped / STAT_VALUE_MAX) * STAT_BAR_WIDTH as f64).round() as usize;
    format!(
        "{}{} {:>3}",
        "█".repeat(filled),
        "░".repeat(STAT_BAR_WIDTH - filled),
        clamped.round() as i64
    )
}

/// Faint terminal text for side notices.
pub fn dim(text: &str) -> String {
    format!("\x1b[2m{text}\x1b[0m")
}
