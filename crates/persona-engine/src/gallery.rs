use anyhow::{bail, Result};
use persona_contracts::characters::{Character, CharacterId};

/// The one change allowed after a character is inserted: its portrait.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CharacterPatch {
    pub image_url: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatchOutcome {
    Applied,
    AlreadySet,
    NotFound,
}

/// Session gallery, newest first. Only the orchestrator mutates it; the
/// portrait is the single field that may be filled in after insertion, and
/// only once.
#[derive(Debug, Clone, Default)]
pub struct GalleryStore {
    characters: Vec<Character>,
}

impl GalleryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn characters(&self) -> &[Character] {
        &self.characters
    }

    pub fn len(&self) -> usize {
        self.characters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.characters.is_empty()
    }

    pub fn get(&self, id: CharacterId) -> Option<&Character> {
        self.characters.iter().find(|character| character.id == id)
    }

    pub fn position(&self, id: CharacterId) -> Option<usize> {
        self.characters
            .iter()
            .position(|character| character.id == id)
    }

    pub(crate) fn prepend(&mut self, character: Character) -> Result<()> {
        if !character.has_complete_profile() {
            bail!("character {} is missing profile text", character.id);
        }
        if character.has_image() {
            bail!("character {} already has a portrait", character.id);
        }
        if self.get(character.id).is_some() {
            bail!("character {} is already in the gallery", character.id);
        }
        self.characters.insert(0, character);
        Ok(())
    }

    pub(crate) fn patch_by_id(&mut self, id: CharacterId, patch: CharacterPatch) -> PatchOutcome {
        let Some(character) = self.characters.iter_mut().find(|character| character.id == id)
        else {
            return PatchOutcome::NotFound;
        };
        if character.image_url.is_some() {
            return PatchOutcome::AlreadySet;
        }
        character.image_url = Some(patch.image_url);
        PatchOutcome::Applied
    }
}

#[cfg(test)]
mod tests {
    use persona_contracts::characters::{CharacterProfile, CharacterStat};

    use super::*;

    fn character(name: &str) -> Character {
        Character::from_profile(
            CharacterId::new(),
            CharacterProfile {
                name: name.to_string(),
                title: "수호자".to_string(),
                short_description: "숲을 지킨다.".to_string(),
                full_backstory: "오래된 숲에서 태어났다.".to_string(),
                visual_prompt: "an ancient elf guardian".to_string(),
                traits: vec!["신중함".to_string()],
                stats: vec![CharacterStat {
                    label: "지능".to_string(),
                    value: 80.0,
                }],
            },
            0,
        )
    }

    fn image_patch(url: &str) -> CharacterPatch {
        CharacterPatch {
            image_url: url.to_string(),
        }
    }

    #[test]
    fn prepend_puts_newest_first() -> anyhow::Result<()> {
        let mut gallery = GalleryStore::new();
        let first = character("첫째");
        let second = character("둘째");
        gallery.prepend(first.clone())?;
        gallery.prepend(second.clone())?;
        assert_eq!(gallery.len(), 2);
        assert_eq!(gallery.characters()[0].id, second.id);
        assert_eq!(gallery.position(first.id), Some(1));
        Ok(())
    }

    #[test]
    fn prepend_rejects_records_breaking_the_insert_invariant() {
        let mut gallery = GalleryStore::new();
        let mut with_image = character("그림");
        with_image.image_url = Some("data:image/png;base64,AA==".to_string());
        assert!(gallery.prepend(with_image).is_err());

        let mut blank = character("빈칸");
        blank.full_backstory = " ".to_string();
        assert!(gallery.prepend(blank).is_err());

        let dup = character("중복");
        assert!(gallery.prepend(dup.clone()).is_ok());
        assert!(gallery.prepend(dup).is_err());
        assert_eq!(gallery.len(), 1);
    }

    #[test]
    fn patch_targets_only_matching_id() -> anyhow::Result<()> {
        let mut gallery = GalleryStore::new();
        let older = character("older");
        let newer = character("newer");
        gallery.prepend(older.clone())?;
        gallery.prepend(newer.clone())?;

        let outcome = gallery.patch_by_id(older.id, image_patch("data:image/png;base64,AA=="));
        assert_eq!(outcome, PatchOutcome::Applied);

        let patched = gallery.get(older.id).cloned().unwrap();
        assert_eq!(patched.image_url.as_deref(), Some("data:image/png;base64,AA=="));
        assert_eq!(
            Character {
                image_url: None,
                ..patched
            },
            older
        );
        assert_eq!(gallery.get(newer.id), Some(&newer));
        Ok(())
    }

    #[test]
    fn portrait_is_set_at_most_once() -> anyhow::Result<()> {
        let mut gallery = GalleryStore::new();
        let record = character("once");
        gallery.prepend(record.clone())?;
        gallery.patch_by_id(record.id, image_patch("data:image/png;base64,AA=="));
        assert_eq!(
            gallery.patch_by_id(record.id, image_patch("data:image/png;base64,BB==")),
            PatchOutcome::AlreadySet
        );
        assert_eq!(
            gallery.get(record.id).and_then(|c| c.image_url.as_deref()),
            Some("data:image/png;base64,AA==")
        );
        assert_eq!(
            gallery.patch_by_id(CharacterId::new(), image_patch("x")),
            PatchOutcome::NotFound
        );
        Ok(())
    }
}
