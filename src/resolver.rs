use anyhow::Result;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

use crate::activity::{self, Kind};
use crate::config::Config;
use crate::defaults::DefaultSettings;
use crate::effective::{lock, DefaultsEditor, EffectiveSettings, SettingsPair};
use crate::overrides::{InferenceSettings, OverrideSettings};
use crate::sequence::SequenceId;
use crate::store::{KeyValueStore, KeyValueStoreExt, MemoryStore, SqliteStore};

/// Emitted after any settings mutation so views can refresh.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SettingsChange {
    /// `field` is `"*"` when every default was replaced at once.
    DefaultChanged { field: &'static str },
    /// `sequence_id` is `None` for a draft that has not been registered yet.
    OverrideChanged {
        sequence_id: Option<SequenceId>,
        field: &'static str,
    },
    InferenceChanged {
        sequence_id: Option<SequenceId>,
        field: &'static str,
    },
    Registered { sequence_id: SequenceId },
}

pub(crate) struct ResolverShared {
    pub(crate) defaults: Mutex<DefaultSettings>,
    pub(crate) store: Arc<dyn KeyValueStore>,
    subscribers: Mutex<Vec<mpsc::UnboundedSender<SettingsChange>>>,
}

impl ResolverShared {
    pub(crate) fn emit(&self, change: SettingsChange) {
        debug_eprintln!("[settings] {:?}", change);
        let mut subscribers = lock(&self.subscribers);
        subscribers.retain(|tx| tx.send(change.clone()).is_ok());
    }
}

fn override_key(id: SequenceId) -> String {
    format!("sequence.{}.override", id)
}

fn inference_key(id: SequenceId) -> String {
    format!("sequence.{}.inference", id)
}

/// Which sequences have a submission running, across every submitter.
#[derive(Default)]
struct InFlightClaims {
    next: u64,
    by_sequence: HashMap<SequenceId, u64>,
}

/// Owns the defaults singleton and the per-sequence override/inference records.
///
/// Clones share state; hand one to every view that needs settings.
#[derive(Clone)]
pub struct SettingsResolver {
    shared: Arc<ResolverShared>,
    sequences: Arc<Mutex<HashMap<SequenceId, Arc<SettingsPair>>>>,
    in_flight: Arc<Mutex<InFlightClaims>>,
}

impl SettingsResolver {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        let defaults = DefaultSettings::load(store.as_ref());
        Self {
            shared: Arc::new(ResolverShared {
                defaults: Mutex::new(defaults),
                store,
                subscribers: Mutex::new(Vec::new()),
            }),
            sequences: Arc::new(Mutex::new(HashMap::new())),
            in_flight: Arc::new(Mutex::new(InFlightClaims::default())),
        }
    }

    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryStore::new()))
    }

    /// Resolver backed by the SQLite database named in `config`.
    pub fn open(config: &Config) -> Result<Self> {
        let store = SqliteStore::open_default(config)?;
        Ok(Self::new(Arc::new(store)))
    }

    /// Look up (or create) the settings for a sequence.
    ///
    /// Every call for the same id wraps the same records, so a write through
    /// one proxy is visible through any other.
    pub fn get_effective_settings(&self, id: SequenceId) -> EffectiveSettings {
        let mut sequences = lock(&self.sequences);
        let pair = sequences
            .entry(id)
            .or_insert_with(|| Arc::new(self.hydrate(id)))
            .clone();
        EffectiveSettings::new(self.shared.clone(), pair)
    }

    /// A fresh, unregistered pair for a sequence that has no server id yet.
    pub fn draft_settings(&self) -> EffectiveSettings {
        EffectiveSettings::new(self.shared.clone(), Arc::new(SettingsPair::default()))
    }

    /// Re-key a proxy's records under `id`, replacing anything stored there.
    ///
    /// A pair that was already registered under another id moves: the old id
    /// no longer resolves to it.
    pub fn register_settings(&self, settings: &EffectiveSettings, id: SequenceId) {
        let previous_id = lock(&settings.pair.sequence_id).replace(id);
        {
            let mut sequences = lock(&self.sequences);
            if let Some(old) = previous_id.filter(|old| *old != id) {
                if sequences.get(&old).map_or(false, |pair| Arc::ptr_eq(pair, &settings.pair)) {
                    sequences.remove(&old);
                    debug_eprintln!("[settings] sequence {} re-keyed as {}", old, id);
                }
            }
            if let Some(replaced) = sequences.insert(id, settings.pair.clone()) {
                if !Arc::ptr_eq(&replaced, &settings.pair) {
                    debug_eprintln!("[settings] replaced existing records for sequence {}", id);
                }
            }
        }
        activity::log_for(Kind::Settings, Some(id), format!("Registered settings for sequence {}", id));
        self.shared.emit(SettingsChange::Registered { sequence_id: id });
    }

    /// Write the sequence's records to the store. Unset fields are not written.
    pub fn persist_sequence_settings(&self, id: SequenceId) -> Result<()> {
        let pair = match lock(&self.sequences).get(&id) {
            Some(pair) => pair.clone(),
            None => return Ok(()),
        };
        let overrides = lock(&pair.overrides).clone();
        let inference = lock(&pair.inference).clone();
        let store = self.shared.store.as_ref();

        if overrides.is_empty() {
            store.remove(&override_key(id))?;
        } else {
            store.set(&override_key(id), &overrides)?;
        }
        if inference.is_empty() {
            store.remove(&inference_key(id))?;
        } else {
            store.set(&inference_key(id), &inference)?;
        }
        activity::log_for(Kind::Store, Some(id), format!("Saved settings for sequence {}", id));
        Ok(())
    }

    /// Drop the in-memory records for `id`. Persisted records are kept.
    pub fn forget_sequence(&self, id: SequenceId) -> bool {
        lock(&self.sequences).remove(&id).is_some()
    }

    pub fn is_tracked(&self, id: SequenceId) -> bool {
        lock(&self.sequences).contains_key(&id)
    }

    pub fn defaults(&self) -> DefaultsEditor {
        DefaultsEditor {
            shared: self.shared.clone(),
        }
    }

    pub fn defaults_snapshot(&self) -> DefaultSettings {
        lock(&self.shared.defaults).clone()
    }

    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<SettingsChange> {
        let (tx, rx) = mpsc::unbounded_channel();
        lock(&self.shared.subscribers).push(tx);
        rx
    }

    /// Mark `id` as having a submission in flight. `None` if one already is.
    pub(crate) fn try_claim_submission(&self, id: SequenceId) -> Option<u64> {
        let mut claims = lock(&self.in_flight);
        if claims.by_sequence.contains_key(&id) {
            return None;
        }
        claims.next += 1;
        let claim = claims.next;
        claims.by_sequence.insert(id, claim);
        Some(claim)
    }

    /// Release a claim taken by `try_claim_submission`. A stale claim is ignored.
    pub(crate) fn release_submission(&self, id: SequenceId, claim: u64) {
        let mut claims = lock(&self.in_flight);
        if claims.by_sequence.get(&id) == Some(&claim) {
            claims.by_sequence.remove(&id);
        }
    }

    pub fn is_submission_in_flight(&self, id: SequenceId) -> bool {
        lock(&self.in_flight).by_sequence.contains_key(&id)
    }

    fn hydrate(&self, id: SequenceId) -> SettingsPair {
        let store = self.shared.store.as_ref();
        let overrides = store.get(&override_key(id), OverrideSettings::default());
        let inference = store.get(&inference_key(id), InferenceSettings::default());
        SettingsPair::new(overrides, inference, Some(id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::defaults::FontDesign;
    use crate::store::SqliteStore;

    #[test]
    fn test_lookup_is_idempotent() {
        let resolver = SettingsResolver::in_memory();
        let first = resolver.get_effective_settings(7);
        let second = resolver.get_effective_settings(7);

        assert!(first.shares_records_with(&second));
        first.set_show_message_headers(true);
        assert!(second.show_message_headers());
        assert_eq!(second.overrides_snapshot().show_message_headers, Some(true));
    }

    #[test]
    fn test_different_ids_get_different_records() {
        let resolver = SettingsResolver::in_memory();
        let a = resolver.get_effective_settings(1);
        let b = resolver.get_effective_settings(2);

        assert!(!a.shares_records_with(&b));
        a.set_message_font_size(18);
        assert_eq!(b.message_font_size(), 12);
    }

    #[test]
    fn test_draft_is_valid_and_untracked() {
        let resolver = SettingsResolver::in_memory();
        let draft = resolver.draft_settings();

        assert_eq!(draft.sequence_id(), None);
        assert!(draft.allow_continuation());
        draft.set_force_retrieval(true);
        assert!(draft.force_retrieval());
    }

    #[test]
    fn test_register_transfers_draft_records() {
        let resolver = SettingsResolver::in_memory();
        let draft = resolver.draft_settings();
        draft.set_message_font_design(FontDesign::Serif);
        draft.set_seed_assistant_response("Sure,");

        resolver.register_settings(&draft, 42);

        let fetched = resolver.get_effective_settings(42);
        assert!(fetched.shares_records_with(&draft));
        assert_eq!(fetched.message_font_design(), FontDesign::Serif);
        assert_eq!(fetched.seed_assistant_response(), "Sure,");
        assert_eq!(fetched.sequence_id(), Some(42));
    }

    #[test]
    fn test_register_overwrites_existing_records() {
        let resolver = SettingsResolver::in_memory();
        let stale = resolver.get_effective_settings(5);
        stale.set_render_as_markdown(false);

        let draft = resolver.draft_settings();
        resolver.register_settings(&draft, 5);

        let fetched = resolver.get_effective_settings(5);
        assert!(fetched.shares_records_with(&draft));
        assert!(!fetched.shares_records_with(&stale));
        assert!(fetched.render_as_markdown());
    }

    #[test]
    fn test_re_registering_moves_records_to_new_id() {
        let resolver = SettingsResolver::in_memory();
        let draft = resolver.draft_settings();
        draft.set_message_font_size(20);
        resolver.register_settings(&draft, 5);
        resolver.register_settings(&draft, 77);

        assert!(!resolver.is_tracked(5));
        assert!(resolver.is_tracked(77));
        assert_eq!(draft.sequence_id(), Some(77));

        // The old id now resolves to fresh records.
        let old = resolver.get_effective_settings(5);
        assert!(!old.shares_records_with(&draft));
        assert_eq!(old.message_font_size(), 12);
    }

    #[test]
    fn test_re_keying_keeps_records_registered_by_someone_else() {
        let resolver = SettingsResolver::in_memory();
        let first = resolver.draft_settings();
        resolver.register_settings(&first, 5);
        let second = resolver.draft_settings();
        resolver.register_settings(&second, 5);

        // `first` no longer owns 5, so moving it must leave `second` in place.
        resolver.register_settings(&first, 6);
        assert!(resolver.get_effective_settings(5).shares_records_with(&second));
        assert!(resolver.get_effective_settings(6).shares_records_with(&first));
    }

    #[test]
    fn test_submission_claims_are_per_sequence() {
        let resolver = SettingsResolver::in_memory();
        let claim = resolver.try_claim_submission(9).unwrap();
        assert!(resolver.is_submission_in_flight(9));
        assert_eq!(resolver.clone().try_claim_submission(9), None);
        assert!(resolver.try_claim_submission(10).is_some());

        resolver.release_submission(9, claim + 100);
        assert!(resolver.is_submission_in_flight(9));
        resolver.release_submission(9, claim);
        assert!(!resolver.is_submission_in_flight(9));
        assert!(resolver.try_claim_submission(9).is_some());
    }

    #[test]
    fn test_open_uses_configured_database() {
        let dir = std::env::temp_dir().join(format!("chat-settings-resolver-{}", std::process::id()));
        let mut config = Config::default();
        config.storage.database = dir.join("settings.db").to_string_lossy().into_owned();

        let resolver = SettingsResolver::open(&config).unwrap();
        resolver.defaults().set_render_as_markdown(false).unwrap();
        drop(resolver);

        let reopened = SettingsResolver::open(&config).unwrap();
        assert!(!reopened.defaults_snapshot().render_as_markdown);
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_defaults_persist_across_resolvers() {
        let store: Arc<dyn KeyValueStore> = Arc::new(SqliteStore::open_in_memory().unwrap());
        let resolver = SettingsResolver::new(store.clone());
        resolver.defaults().set_allow_continuation(false).unwrap();
        resolver.defaults().set_message_font_design(FontDesign::Monospaced).unwrap();

        let restarted = SettingsResolver::new(store);
        let settings = restarted.get_effective_settings(1);
        assert!(!settings.allow_continuation());
        assert_eq!(settings.message_font_design(), FontDesign::Monospaced);
    }

    #[test]
    fn test_persisted_sequence_settings_keep_unset_fields() {
        let store: Arc<dyn KeyValueStore> = Arc::new(SqliteStore::open_in_memory().unwrap());
        let resolver = SettingsResolver::new(store.clone());
        let settings = resolver.get_effective_settings(11);
        settings.set_force_retrieval(true);
        settings.set_retrieval_policy("custom");
        resolver.persist_sequence_settings(11).unwrap();

        let restarted = SettingsResolver::new(store.clone());
        restarted.defaults().set_allow_continuation(false).unwrap();
        let reloaded = restarted.get_effective_settings(11);

        assert_eq!(reloaded.overrides_snapshot().allow_continuation, None);
        assert!(!reloaded.allow_continuation());
        assert!(reloaded.force_retrieval());
        assert_eq!(reloaded.retrieval_policy(), "custom");
    }

    #[test]
    fn test_persisting_empty_records_removes_keys() {
        let store: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
        let resolver = SettingsResolver::new(store.clone());
        let settings = resolver.get_effective_settings(3);
        settings.set_message_font_size(14);
        resolver.persist_sequence_settings(3).unwrap();
        assert!(store.get_raw("sequence.3.override").unwrap().is_some());

        settings.clear_message_font_size();
        resolver.persist_sequence_settings(3).unwrap();
        assert!(store.get_raw("sequence.3.override").unwrap().is_none());
    }

    #[test]
    fn test_forget_sequence() {
        let resolver = SettingsResolver::in_memory();
        let original = resolver.get_effective_settings(8);
        assert!(resolver.is_tracked(8));
        assert!(resolver.forget_sequence(8));
        assert!(!resolver.is_tracked(8));

        let fresh = resolver.get_effective_settings(8);
        assert!(!fresh.shares_records_with(&original));
    }

    #[test]
    fn test_subscribers_see_changes() {
        let resolver = SettingsResolver::in_memory();
        let mut rx = resolver.subscribe();

        let draft = resolver.draft_settings();
        draft.set_force_retrieval(true);
        resolver.register_settings(&draft, 4);
        draft.set_override_model_template("chatml");
        resolver.defaults().set_message_font_size(16).unwrap();

        assert_eq!(
            rx.try_recv().unwrap(),
            SettingsChange::OverrideChanged {
                sequence_id: None,
                field: "force_retrieval"
            }
        );
        assert_eq!(rx.try_recv().unwrap(), SettingsChange::Registered { sequence_id: 4 });
        assert_eq!(
            rx.try_recv().unwrap(),
            SettingsChange::InferenceChanged {
                sequence_id: Some(4),
                field: "override_model_template"
            }
        );
        assert_eq!(
            rx.try_recv().unwrap(),
            SettingsChange::DefaultChanged {
                field: "message_font_size"
            }
        );
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_dropped_subscribers_are_pruned() {
        let resolver = SettingsResolver::in_memory();
        drop(resolver.subscribe());
        let mut live = resolver.subscribe();

        resolver.get_effective_settings(1).set_allow_continuation(false);
        assert!(live.try_recv().is_ok());
        assert_eq!(lock(&resolver.shared.subscribers).len(), 1);
    }
}
