// In-memory State Store
//
// Three independent mappings, each with its own synchronization. No operation
// spans more than one mapping, so there are no cross-map transactions.

use dashmap::DashMap;
use parking_lot::RwLock;

use crate::core::languages::Language;
use crate::core::types::{ImageContent, PostSchedule, TranslatedContent};

/// Key of a translation slot: `"{image_id}:{language code}"`
pub fn translation_key(image_id: &str, language: Language) -> String {
    format!("{}:{}", image_id, language.code())
}

#[derive(Default)]
pub struct StateStore {
    images: DashMap<String, ImageContent>,
    translations: DashMap<String, TranslatedContent>,
    schedules: RwLock<Vec<PostSchedule>>,
}

impl StateStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put_image(&self, content: ImageContent) {
        self.images.insert(content.image_id.clone(), content);
    }

    pub fn image(&self, image_id: &str) -> Option<ImageContent> {
        self.images.get(image_id).map(|entry| entry.value().clone())
    }

    /// Last write wins for the (image, language) pair
    pub fn put_translation(&self, content: TranslatedContent) {
        let key = translation_key(&content.image_id, content.target_language);
        self.translations.insert(key, content);
    }

    pub fn translation(&self, image_id: &str, language: Language) -> Option<TranslatedContent> {
        self.translations
            .get(&translation_key(image_id, language))
            .map(|entry| entry.value().clone())
    }

    /// All stored translations of one image, ordered by language code
    pub fn translations_for(&self, image_id: &str) -> Vec<TranslatedContent> {
        let mut found: Vec<TranslatedContent> = self
            .translations
            .iter()
            .filter(|entry| entry.value().image_id == image_id)
            .map(|entry| entry.value().clone())
            .collect();
        found.sort_by_key(|t| t.target_language.code());
        found
    }

    pub fn append_schedules(&self, schedules: &[PostSchedule]) {
        self.schedules.write().extend_from_slice(schedules);
    }

    pub fn schedules_for(&self, image_id: &str) -> Vec<PostSchedule> {
        self.schedules
            .read()
            .iter()
            .filter(|s| s.image_id == image_id)
            .cloned()
            .collect()
    }

    pub fn image_count(&self) -> usize {
        self.images.len()
    }

    pub fn translation_count(&self) -> usize {
        self.translations.len()
    }

    pub fn schedule_count(&self) -> usize {
        self.schedules.read().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn translated(image_id: &str, language: Language, text: &str) -> TranslatedContent {
        TranslatedContent {
            image_id: image_id.to_string(),
            target_language: language,
            translated_text: text.to_string(),
            edited_image_path: format!("/tmp/{}_{}.png", image_id, language),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_translation_key_format() {
        assert_eq!(translation_key("abc", Language::Chinese), "abc:zh-cn");
    }

    #[test]
    fn test_rewrite_overwrites_only_its_pair() {
        let store = StateStore::new();
        store.put_translation(translated("img-1", Language::Spanish, "hola"));
        store.put_translation(translated("img-1", Language::French, "bonjour"));
        store.put_translation(translated("img-2", Language::Spanish, "buenas"));

        store.put_translation(translated("img-1", Language::Spanish, "hola de nuevo"));

        assert_eq!(store.translation_count(), 3);
        assert_eq!(
            store.translation("img-1", Language::Spanish).unwrap().translated_text,
            "hola de nuevo"
        );
        assert_eq!(
            store.translation("img-1", Language::French).unwrap().translated_text,
            "bonjour"
        );
        assert_eq!(
            store.translation("img-2", Language::Spanish).unwrap().translated_text,
            "buenas"
        );
    }

    #[test]
    fn test_translations_for_is_sorted_and_scoped() {
        let store = StateStore::new();
        store.put_translation(translated("img-1", Language::French, "bonjour"));
        store.put_translation(translated("img-1", Language::Spanish, "hola"));
        store.put_translation(translated("img-2", Language::German, "hallo"));

        let langs: Vec<Language> = store
            .translations_for("img-1")
            .into_iter()
            .map(|t| t.target_language)
            .collect();
        assert_eq!(langs, vec![Language::Spanish, Language::French]);
        assert!(store.translations_for("missing").is_empty());
    }

    #[test]
    fn test_images_are_keyed_by_id() {
        let store = StateStore::new();
        let content = ImageContent::new("a.png", Language::English, "HELLO".to_string());
        let id = content.image_id.clone();
        store.put_image(content);

        assert_eq!(store.image(&id).unwrap().extracted_text, "HELLO");
        assert!(store.image("nope").is_none());
        assert_eq!(store.image_count(), 1);
    }
}
