// Per-chat stop-word, trigger and note caches.
//
// Storage is the source of truth. A chat's vocabulary is loaded on first
// lookup; admin edits go to storage first and then drop the cached copy of
// what they touched, so the next lookup reads the fresh rows.
//
// Every edit also stamps the chat with a new generation. A load records the
// generation before reading storage and only caches its result if the stamp
// is unchanged afterwards; otherwise an edit landed mid-read and the load
// starts over.

use super::moderation_ports::{ModerationError, ModerationStore, PolicyError, StoreError};
use dashmap::DashMap;
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Loads retried this often before the result is served uncached.
const LOAD_ATTEMPTS: usize = 3;

/// A trigger that matched a message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TriggerHit {
    pub keyword: String,
    pub response: String,
}

/// A `#name` message that named a saved note.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NoteHit {
    pub name: String,
    pub content: String,
}

type StopWords = HashSet<String>;
type Responses = HashMap<String, String>;

#[derive(Default)]
struct ChatVocabulary {
    /// Stamp of the last edit; 0 if the chat was never edited.
    generation: u64,
    stop_words: Option<Arc<StopWords>>,
    triggers: Option<Arc<Responses>>,
    notes: Option<Arc<Responses>>,
}

fn stop_words_slot(v: &mut ChatVocabulary) -> &mut Option<Arc<StopWords>> {
    &mut v.stop_words
}

fn triggers_slot(v: &mut ChatVocabulary) -> &mut Option<Arc<Responses>> {
    &mut v.triggers
}

fn notes_slot(v: &mut ChatVocabulary) -> &mut Option<Arc<Responses>> {
    &mut v.notes
}

pub struct ContentFilterCache<S: ModerationStore> {
    store: Arc<S>,
    chats: DashMap<u64, ChatVocabulary>,
    edits: AtomicU64,
}

/// Lowercase and trim an admin-supplied word or keyword.
pub fn normalize_term(raw: &str, field: &'static str) -> Result<String, PolicyError> {
    let term = raw.trim().to_lowercase();
    if term.is_empty() {
        return Err(PolicyError::Empty(field));
    }
    Ok(term)
}

/// Note names are single words; a leading `#` is accepted and dropped.
pub fn normalize_note_name(raw: &str) -> Result<String, PolicyError> {
    let name = normalize_term(raw.trim().trim_start_matches('#'), "note name")?;
    if name.split_whitespace().count() > 1 {
        return Err(PolicyError::NotOneWord(name));
    }
    Ok(name)
}

/// Name referenced by a `#name ...` message, if the message starts with one.
pub fn note_reference(text: &str) -> Option<String> {
    let name = text.strip_prefix('#')?.split_whitespace().next()?;
    Some(name.to_lowercase())
}

impl<S: ModerationStore> ContentFilterCache<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self {
            store,
            chats: DashMap::new(),
            edits: AtomicU64::new(0),
        }
    }

    /// First stop word contained in `text`, if any.
    pub async fn is_stopword_hit(
        &self,
        chat_id: u64,
        text: &str,
    ) -> Result<Option<String>, StoreError> {
        let words = self.stop_words(chat_id).await?;
        let text = text.to_lowercase();

        let mut hits: Vec<&String> = words.iter().filter(|w| text.contains(w.as_str())).collect();
        hits.sort();
        Ok(hits.first().map(|w| (*w).clone()))
    }

    /// Matching trigger for `text`. The longest keyword wins when several match.
    pub async fn is_trigger_hit(
        &self,
        chat_id: u64,
        text: &str,
    ) -> Result<Option<TriggerHit>, StoreError> {
        let triggers = self.triggers(chat_id).await?;
        let text = text.to_lowercase();

        Ok(triggers
            .iter()
            .filter(|(keyword, _)| text.contains(keyword.as_str()))
            .max_by(|(a, _), (b, _)| a.len().cmp(&b.len()).then_with(|| b.cmp(a)))
            .map(|(keyword, response)| TriggerHit {
                keyword: keyword.clone(),
                response: response.clone(),
            }))
    }

    /// Saved note named by a `#name` message.
    pub async fn recall_note(&self, chat_id: u64, text: &str) -> Result<Option<NoteHit>, StoreError> {
        let Some(name) = note_reference(text) else {
            return Ok(None);
        };
        let notes = self.notes(chat_id).await?;
        Ok(notes.get(&name).map(|content| NoteHit {
            name,
            content: content.clone(),
        }))
    }

    /// Forget everything cached for a chat. The next lookup reloads it.
    pub fn invalidate(&self, chat_id: u64) {
        self.chats.remove(&chat_id);
    }

    pub async fn add_stop_word(&self, chat_id: u64, raw: &str) -> Result<(String, bool), ModerationError> {
        let word = normalize_term(raw, "stop word")?;
        let added = self.store.add_stop_word(chat_id, &word).await?;
        self.edited(chat_id, stop_words_slot);
        Ok((word, added))
    }

    pub async fn remove_stop_word(&self, chat_id: u64, raw: &str) -> Result<(String, bool), ModerationError> {
        let word = normalize_term(raw, "stop word")?;
        let removed = self.store.remove_stop_word(chat_id, &word).await?;
        self.edited(chat_id, stop_words_slot);
        Ok((word, removed))
    }

    /// Sorted stop words, read through the cache.
    pub async fn list_stop_words(&self, chat_id: u64) -> Result<Vec<String>, StoreError> {
        let mut words: Vec<String> = self.stop_words(chat_id).await?.iter().cloned().collect();
        words.sort();
        Ok(words)
    }

    /// Returns the normalized keyword and whether it is new.
    pub async fn add_trigger(
        &self,
        chat_id: u64,
        raw_keyword: &str,
        response: &str,
    ) -> Result<(String, bool), ModerationError> {
        let keyword = normalize_term(raw_keyword, "trigger keyword")?;
        if response.trim().is_empty() {
            return Err(PolicyError::Empty("trigger response").into());
        }
        let is_new = self.store.upsert_trigger(chat_id, &keyword, response).await?;
        self.edited(chat_id, triggers_slot);
        Ok((keyword, is_new))
    }

    pub async fn remove_trigger(&self, chat_id: u64, raw_keyword: &str) -> Result<(String, bool), ModerationError> {
        let keyword = normalize_term(raw_keyword, "trigger keyword")?;
        let removed = self.store.remove_trigger(chat_id, &keyword).await?;
        self.edited(chat_id, triggers_slot);
        Ok((keyword, removed))
    }

    /// Sorted trigger keywords, read through the cache.
    pub async fn list_triggers(&self, chat_id: u64) -> Result<Vec<String>, StoreError> {
        let mut keywords: Vec<String> = self.triggers(chat_id).await?.keys().cloned().collect();
        keywords.sort();
        Ok(keywords)
    }

    /// Returns the normalized name and whether it is new.
    pub async fn add_note(
        &self,
        chat_id: u64,
        raw_name: &str,
        content: &str,
    ) -> Result<(String, bool), ModerationError> {
        let name = normalize_note_name(raw_name)?;
        if content.trim().is_empty() {
            return Err(PolicyError::Empty("note content").into());
        }
        let is_new = self.store.upsert_note(chat_id, &name, content).await?;
        self.edited(chat_id, notes_slot);
        Ok((name, is_new))
    }

    pub async fn remove_note(&self, chat_id: u64, raw_name: &str) -> Result<(String, bool), ModerationError> {
        let name = normalize_note_name(raw_name)?;
        let removed = self.store.remove_note(chat_id, &name).await?;
        self.edited(chat_id, notes_slot);
        Ok((name, removed))
    }

    /// Sorted note names, read through the cache.
    pub async fn list_notes(&self, chat_id: u64) -> Result<Vec<String>, StoreError> {
        let mut names: Vec<String> = self.notes(chat_id).await?.keys().cloned().collect();
        names.sort();
        Ok(names)
    }

    async fn stop_words(&self, chat_id: u64) -> Result<Arc<StopWords>, StoreError> {
        self.load(chat_id, "stop words", stop_words_slot, || self.store.stop_words(chat_id))
            .await
    }

    async fn triggers(&self, chat_id: u64) -> Result<Arc<Responses>, StoreError> {
        self.load(chat_id, "triggers", triggers_slot, || self.store.triggers(chat_id))
            .await
    }

    async fn notes(&self, chat_id: u64) -> Result<Arc<Responses>, StoreError> {
        self.load(chat_id, "notes", notes_slot, || self.store.notes(chat_id))
            .await
    }

    /// Stamp the chat after a storage write and drop the stale copy.
    fn edited<T>(&self, chat_id: u64, slot: fn(&mut ChatVocabulary) -> &mut Option<Arc<T>>) {
        let mut vocabulary = self.chats.entry(chat_id).or_default();
        vocabulary.generation = self.edits.fetch_add(1, Ordering::Relaxed) + 1;
        *slot(&mut vocabulary) = None;
    }

    async fn load<T, F, Fut>(
        &self,
        chat_id: u64,
        what: &'static str,
        slot: fn(&mut ChatVocabulary) -> &mut Option<Arc<T>>,
        fetch: F,
    ) -> Result<Arc<T>, StoreError>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, StoreError>>,
    {
        let mut attempt = 0;
        loop {
            let generation = {
                let mut vocabulary = self.chats.entry(chat_id).or_default();
                if let Some(cached) = slot(&mut vocabulary) {
                    return Ok(Arc::clone(cached));
                }
                vocabulary.generation
            };

            let loaded = Arc::new(fetch().await?);
            attempt += 1;

            {
                let mut vocabulary = self.chats.entry(chat_id).or_default();
                if vocabulary.generation == generation {
                    tracing::debug!(chat_id, what, "Loaded chat vocabulary");
                    let cached = slot(&mut vocabulary).get_or_insert_with(|| Arc::clone(&loaded));
                    return Ok(Arc::clone(cached));
                }
            }

            if attempt >= LOAD_ATTEMPTS {
                tracing::warn!(chat_id, what, "Vocabulary kept changing while loading; serving uncached");
                return Ok(loaded);
            }
            tracing::debug!(chat_id, what, "Vocabulary edited while loading; reloading");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::moderation::test_support::MockModerationStore;
    use std::time::Duration;

    fn cache() -> (Arc<MockModerationStore>, ContentFilterCache<MockModerationStore>) {
        let store = Arc::new(MockModerationStore::new());
        (store.clone(), ContentFilterCache::new(store))
    }

    #[tokio::test]
    async fn test_stop_word_add_then_remove() {
        let (_, cache) = cache();

        cache.add_stop_word(1, "spam").await.unwrap();
        let hit = cache.is_stopword_hit(1, "this is spam now").await.unwrap();
        assert_eq!(hit.as_deref(), Some("spam"));

        cache.remove_stop_word(1, "spam").await.unwrap();
        let hit = cache.is_stopword_hit(1, "this is spam now").await.unwrap();
        assert_eq!(hit, None);
    }

    #[tokio::test]
    async fn test_lookup_is_case_insensitive() {
        let (_, cache) = cache();
        let (word, added) = cache.add_stop_word(1, "  SpAm ").await.unwrap();
        assert_eq!(word, "spam");
        assert!(added);

        assert!(cache.is_stopword_hit(1, "BUY SPAM").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_loads_once_then_serves_from_cache() {
        let (store, cache) = cache();
        store.add_stop_word(1, "scam").await.unwrap();

        assert!(cache.is_stopword_hit(1, "a scam").await.unwrap().is_some());
        assert!(cache.is_stopword_hit(1, "hello").await.unwrap().is_none());
        assert_eq!(store.stop_word_loads.load(Ordering::SeqCst), 1);

        cache.invalidate(1);
        cache.is_stopword_hit(1, "hello").await.unwrap();
        assert_eq!(store.stop_word_loads.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_edit_before_first_lookup_is_not_lost() {
        let (store, cache) = cache();
        store.add_stop_word(1, "old").await.unwrap();

        // Chat was never loaded; the edit must not create a partial cache.
        cache.add_stop_word(1, "new").await.unwrap();

        assert!(cache.is_stopword_hit(1, "old news").await.unwrap().is_some());
        assert!(cache.is_stopword_hit(1, "brand new").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_duplicate_stop_word_reported() {
        let (_, cache) = cache();
        assert!(cache.add_stop_word(1, "spam").await.unwrap().1);
        assert!(!cache.add_stop_word(1, "spam").await.unwrap().1);
        assert!(!cache.remove_stop_word(1, "ham").await.unwrap().1);
    }

    #[tokio::test]
    async fn test_empty_term_rejected() {
        let (_, cache) = cache();
        let err = cache.add_stop_word(1, "   ").await.unwrap_err();
        assert!(matches!(err, ModerationError::Policy(PolicyError::Empty(_))));
        assert!(cache.list_stop_words(1).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_trigger_lifecycle() {
        let (_, cache) = cache();

        let (_, is_new) = cache.add_trigger(1, "Rules", "Read the pinned message").await.unwrap();
        assert!(is_new);
        let (_, is_new) = cache.add_trigger(1, "rules", "See #rules").await.unwrap();
        assert!(!is_new);

        let hit = cache.is_trigger_hit(1, "where are the RULES?").await.unwrap().unwrap();
        assert_eq!(hit.keyword, "rules");
        assert_eq!(hit.response, "See #rules");

        assert!(cache.remove_trigger(1, "rules").await.unwrap().1);
        assert!(cache.is_trigger_hit(1, "rules").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_longest_trigger_wins() {
        let (_, cache) = cache();
        cache.add_trigger(1, "help", "short").await.unwrap();
        cache.add_trigger(1, "help me", "long").await.unwrap();

        let hit = cache.is_trigger_hit(1, "please help me").await.unwrap().unwrap();
        assert_eq!(hit.response, "long");
        assert_eq!(cache.list_triggers(1).await.unwrap(), vec!["help", "help me"]);
    }

    #[tokio::test]
    async fn test_chats_do_not_share_vocabulary() {
        let (_, cache) = cache();
        cache.add_stop_word(1, "spam").await.unwrap();
        assert!(cache.is_stopword_hit(2, "spam").await.unwrap().is_none());
    }

    fn slow_cache() -> Arc<ContentFilterCache<MockModerationStore>> {
        let store = Arc::new(MockModerationStore::new().slow_loads(Duration::from_millis(50)));
        Arc::new(ContentFilterCache::new(store))
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_word_added_during_first_load_is_enforced() {
        let cache = slow_cache();

        let first_lookup = tokio::spawn({
            let cache = Arc::clone(&cache);
            async move { cache.is_stopword_hit(1, "hello").await }
        });
        tokio::time::sleep(Duration::from_millis(10)).await;
        cache.add_stop_word(1, "spam").await.unwrap();

        assert_eq!(first_lookup.await.unwrap().unwrap(), None);
        for _ in 0..3 {
            let hit = cache.is_stopword_hit(1, "buy spam").await.unwrap();
            assert_eq!(hit.as_deref(), Some("spam"));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_word_removed_during_first_load_stays_removed() {
        let store = Arc::new(MockModerationStore::new().slow_loads(Duration::from_millis(50)));
        store.add_stop_word(1, "spam").await.unwrap();
        let cache = Arc::new(ContentFilterCache::new(store));

        let first_lookup = tokio::spawn({
            let cache = Arc::clone(&cache);
            async move { cache.is_stopword_hit(1, "spam").await }
        });
        tokio::time::sleep(Duration::from_millis(10)).await;
        cache.remove_stop_word(1, "spam").await.unwrap();

        first_lookup.await.unwrap().unwrap();
        assert_eq!(cache.is_stopword_hit(1, "spam").await.unwrap(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_trigger_saved_during_first_load_is_enforced() {
        let cache = slow_cache();

        let first_lookup = tokio::spawn({
            let cache = Arc::clone(&cache);
            async move { cache.is_trigger_hit(1, "hello").await }
        });
        tokio::time::sleep(Duration::from_millis(10)).await;
        cache.add_trigger(1, "rules", "Read the pins").await.unwrap();

        first_lookup.await.unwrap().unwrap();
        let hit = cache.is_trigger_hit(1, "the rules?").await.unwrap().unwrap();
        assert_eq!(hit.response, "Read the pins");
        assert_eq!(cache.list_triggers(1).await.unwrap(), vec!["rules"]);
    }

    #[tokio::test]
    async fn test_note_recall_by_hash_name() {
        let (_, cache) = cache();
        let (name, is_new) = cache.add_note(1, "#Rules", "1. Be nice").await.unwrap();
        assert_eq!(name, "rules");
        assert!(is_new);
        assert!(!cache.add_note(1, "rules", "1. Be nice\n2. No ads").await.unwrap().1);

        let hit = cache.recall_note(1, "#RULES please").await.unwrap().unwrap();
        assert_eq!(hit.name, "rules");
        assert_eq!(hit.content, "1. Be nice\n2. No ads");

        assert!(cache.recall_note(1, "rules").await.unwrap().is_none());
        assert!(cache.recall_note(1, "#faq").await.unwrap().is_none());
        assert!(cache.recall_note(2, "#rules").await.unwrap().is_none());
        assert_eq!(cache.list_notes(1).await.unwrap(), vec!["rules"]);

        assert!(cache.remove_note(1, "rules").await.unwrap().1);
        assert!(cache.recall_note(1, "#rules").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_note_name_must_be_one_word() {
        let (_, cache) = cache();
        let err = cache.add_note(1, "house rules", "text").await.unwrap_err();
        assert!(matches!(err, ModerationError::Policy(PolicyError::NotOneWord(_))));
        let err = cache.add_note(1, "faq", "   ").await.unwrap_err();
        assert!(matches!(err, ModerationError::Policy(PolicyError::Empty(_))));
    }

    #[test]
    fn test_note_reference_parsing() {
        assert_eq!(note_reference("#faq"), Some("faq".to_string()));
        assert_eq!(note_reference("#FAQ and more"), Some("faq".to_string()));
        assert_eq!(note_reference("# faq"), None);
        assert_eq!(note_reference("see #faq"), None);
    }
}
