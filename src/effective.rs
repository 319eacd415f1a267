//! Resolved view over defaults plus one sequence's override/inference records.
//!
//! Getters read the override first and fall back to the defaults (or to an
//! empty string for inference text). Setters write the override record; the
//! defaults are only reachable through [`DefaultsEditor`].

use anyhow::Result;
use serde::Serialize;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::defaults::{storage_key, AutonamingPolicy, DefaultSettings, FontDesign};
use crate::overrides::{InferenceSettings, OverrideSettings};
use crate::resolver::{ResolverShared, SettingsChange};
use crate::sequence::SequenceId;
use crate::store::KeyValueStoreExt;

pub(crate) fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// The override and inference records that belong to one sequence (or draft).
#[derive(Debug, Default)]
pub(crate) struct SettingsPair {
    pub(crate) overrides: Mutex<OverrideSettings>,
    pub(crate) inference: Mutex<InferenceSettings>,
    pub(crate) sequence_id: Mutex<Option<SequenceId>>,
}

impl SettingsPair {
    pub(crate) fn new(
        overrides: OverrideSettings,
        inference: InferenceSettings,
        sequence_id: Option<SequenceId>,
    ) -> Self {
        SettingsPair {
            overrides: Mutex::new(overrides),
            inference: Mutex::new(inference),
            sequence_id: Mutex::new(sequence_id),
        }
    }
}

macro_rules! override_field {
    ($field:ident, $setter:ident, $clear:ident, $ty:ty) => {
        pub fn $field(&self) -> $ty {
            let overridden = lock(&self.pair.overrides).$field;
            overridden.unwrap_or_else(|| lock(&self.shared.defaults).$field)
        }

        pub fn $setter(&self, value: $ty) {
            lock(&self.pair.overrides).$field = Some(value);
            self.emit_override(stringify!($field));
        }

        pub fn $clear(&self) {
            lock(&self.pair.overrides).$field = None;
            self.emit_override(stringify!($field));
        }
    };
}

macro_rules! inference_field {
    ($field:ident, $setter:ident, $clear:ident) => {
        pub fn $field(&self) -> String {
            lock(&self.pair.inference).$field.clone().unwrap_or_default()
        }

        pub fn $setter(&self, value: impl Into<String>) {
            lock(&self.pair.inference).$field = Some(value.into());
            self.emit_inference(stringify!($field));
        }

        pub fn $clear(&self) {
            lock(&self.pair.inference).$field = None;
            self.emit_inference(stringify!($field));
        }
    };
}

macro_rules! default_field {
    ($field:ident, $setter:ident, $ty:ty) => {
        pub fn $field(&self) -> $ty {
            lock(&self.shared.defaults).$field
        }

        pub fn $setter(&self, value: $ty) -> Result<()> {
            self.shared
                .store
                .set(&storage_key(stringify!($field)), &value)?;
            lock(&self.shared.defaults).$field = value;
            self.shared.emit(SettingsChange::DefaultChanged {
                field: stringify!($field),
            });
            Ok(())
        }
    };
}

/// Proxy handed to views. Cloning it shares the same underlying records.
#[derive(Clone)]
pub struct EffectiveSettings {
    pub(crate) shared: Arc<ResolverShared>,
    pub(crate) pair: Arc<SettingsPair>,
}

impl std::fmt::Debug for EffectiveSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EffectiveSettings")
            .field("sequence_id", &self.sequence_id())
            .field("overrides", &*lock(&self.pair.overrides))
            .field("inference", &*lock(&self.pair.inference))
            .finish()
    }
}

impl EffectiveSettings {
    pub(crate) fn new(shared: Arc<ResolverShared>, pair: Arc<SettingsPair>) -> Self {
        EffectiveSettings { shared, pair }
    }

    override_field!(allow_continuation, set_allow_continuation, clear_allow_continuation, bool);
    override_field!(
        show_separate_retrieval_button,
        set_show_separate_retrieval_button,
        clear_show_separate_retrieval_button,
        bool
    );
    override_field!(force_retrieval, set_force_retrieval, clear_force_retrieval, bool);
    override_field!(show_message_headers, set_show_message_headers, clear_show_message_headers, bool);
    override_field!(render_as_markdown, set_render_as_markdown, clear_render_as_markdown, bool);
    override_field!(
        animate_new_response_text,
        set_animate_new_response_text,
        clear_animate_new_response_text,
        bool
    );
    override_field!(
        stay_awake_during_inference,
        set_stay_awake_during_inference,
        clear_stay_awake_during_inference,
        bool
    );
    override_field!(
        message_font_design,
        set_message_font_design,
        clear_message_font_design,
        FontDesign
    );
    override_field!(
        text_entry_font_design,
        set_text_entry_font_design,
        clear_text_entry_font_design,
        FontDesign
    );
    override_field!(message_font_size, set_message_font_size, clear_message_font_size, u32);
    override_field!(text_entry_font_size, set_text_entry_font_size, clear_text_entry_font_size, u32);
    override_field!(
        response_buffer_flush_interval_msec,
        set_response_buffer_flush_interval_msec,
        clear_response_buffer_flush_interval_msec,
        u32
    );
    override_field!(
        scroll_on_new_text_delay_msec,
        set_scroll_on_new_text_delay_msec,
        clear_scroll_on_new_text_delay_msec,
        u32
    );
    override_field!(
        sequence_list_batch_size,
        set_sequence_list_batch_size,
        clear_sequence_list_batch_size,
        u32
    );

    inference_field!(override_system_prompt, set_override_system_prompt, clear_override_system_prompt);
    inference_field!(override_model_template, set_override_model_template, clear_override_model_template);
    inference_field!(seed_assistant_response, set_seed_assistant_response, clear_seed_assistant_response);
    inference_field!(retrieval_policy, set_retrieval_policy, clear_retrieval_policy);
    inference_field!(retrieval_search_args, set_retrieval_search_args, clear_retrieval_search_args);

    pub fn autonaming_policy(&self) -> AutonamingPolicy {
        let overridden = lock(&self.pair.inference).autonaming_policy;
        overridden.unwrap_or_else(|| lock(&self.shared.defaults).autonaming_policy)
    }

    pub fn set_autonaming_policy(&self, policy: AutonamingPolicy) {
        lock(&self.pair.inference).autonaming_policy = Some(policy);
        self.emit_inference("autonaming_policy");
    }

    pub fn clear_autonaming_policy(&self) {
        lock(&self.pair.inference).autonaming_policy = None;
        self.emit_inference("autonaming_policy");
    }

    /// Force-retrieval only applies while there is no separate retrieval button.
    /// The stored value is left alone either way.
    pub fn force_retrieval_active(&self) -> bool {
        self.force_retrieval() && !self.show_separate_retrieval_button()
    }

    /// Entry point for the global settings screen.
    pub fn defaults(&self) -> DefaultsEditor {
        DefaultsEditor {
            shared: self.shared.clone(),
        }
    }

    pub fn sequence_id(&self) -> Option<SequenceId> {
        *lock(&self.pair.sequence_id)
    }

    /// True when both proxies read and write the same override/inference records.
    pub fn shares_records_with(&self, other: &EffectiveSettings) -> bool {
        Arc::ptr_eq(&self.pair, &other.pair)
    }

    pub fn overrides_snapshot(&self) -> OverrideSettings {
        lock(&self.pair.overrides).clone()
    }

    pub fn inference_snapshot(&self) -> InferenceSettings {
        lock(&self.pair.inference).clone()
    }

    pub fn clear_all_overrides(&self) {
        lock(&self.pair.overrides).clear();
        self.emit_override("*");
    }

    pub fn resolve(&self) -> ResolvedSettings {
        ResolvedSettings {
            allow_continuation: self.allow_continuation(),
            show_separate_retrieval_button: self.show_separate_retrieval_button(),
            force_retrieval: self.force_retrieval(),
            force_retrieval_active: self.force_retrieval_active(),
            show_message_headers: self.show_message_headers(),
            render_as_markdown: self.render_as_markdown(),
            animate_new_response_text: self.animate_new_response_text(),
            stay_awake_during_inference: self.stay_awake_during_inference(),
            message_font_design: self.message_font_design(),
            text_entry_font_design: self.text_entry_font_design(),
            message_font_size: self.message_font_size(),
            text_entry_font_size: self.text_entry_font_size(),
            response_buffer_flush_interval_msec: self.response_buffer_flush_interval_msec(),
            scroll_on_new_text_delay_msec: self.scroll_on_new_text_delay_msec(),
            sequence_list_batch_size: self.sequence_list_batch_size(),
            override_system_prompt: self.override_system_prompt(),
            override_model_template: self.override_model_template(),
            seed_assistant_response: self.seed_assistant_response(),
            retrieval_policy: self.retrieval_policy(),
            retrieval_search_args: self.retrieval_search_args(),
            autonaming_policy: self.autonaming_policy(),
        }
    }

    fn emit_override(&self, field: &'static str) {
        self.shared.emit(SettingsChange::OverrideChanged {
            sequence_id: self.sequence_id(),
            field,
        });
    }

    fn emit_inference(&self, field: &'static str) {
        self.shared.emit(SettingsChange::InferenceChanged {
            sequence_id: self.sequence_id(),
            field,
        });
    }
}

/// Writes application-wide defaults and persists each change immediately.
#[derive(Clone)]
pub struct DefaultsEditor {
    pub(crate) shared: Arc<ResolverShared>,
}

impl DefaultsEditor {
    default_field!(allow_continuation, set_allow_continuation, bool);
    default_field!(show_separate_retrieval_button, set_show_separate_retrieval_button, bool);
    default_field!(force_retrieval, set_force_retrieval, bool);
    default_field!(show_message_headers, set_show_message_headers, bool);
    default_field!(render_as_markdown, set_render_as_markdown, bool);
    default_field!(animate_new_response_text, set_animate_new_response_text, bool);
    default_field!(stay_awake_during_inference, set_stay_awake_during_inference, bool);
    default_field!(message_font_design, set_message_font_design, FontDesign);
    default_field!(text_entry_font_design, set_text_entry_font_design, FontDesign);
    default_field!(message_font_size, set_message_font_size, u32);
    default_field!(text_entry_font_size, set_text_entry_font_size, u32);
    default_field!(response_buffer_flush_interval_msec, set_response_buffer_flush_interval_msec, u32);
    default_field!(scroll_on_new_text_delay_msec, set_scroll_on_new_text_delay_msec, u32);
    default_field!(sequence_list_batch_size, set_sequence_list_batch_size, u32);
    default_field!(autonaming_policy, set_autonaming_policy, AutonamingPolicy);

    pub fn snapshot(&self) -> DefaultSettings {
        lock(&self.shared.defaults).clone()
    }

    pub fn reset_to_factory(&self) -> Result<()> {
        let factory = DefaultSettings::default();
        factory.persist_all(self.shared.store.as_ref())?;
        *lock(&self.shared.defaults) = factory;
        self.shared.emit(SettingsChange::DefaultChanged { field: "*" });
        Ok(())
    }
}

/// Plain copy of every effective value at one point in time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResolvedSettings {
    pub allow_continuation: bool,
    pub show_separate_retrieval_button: bool,
    pub force_retrieval: bool,
    pub force_retrieval_active: bool,
    pub show_message_headers: bool,
    pub render_as_markdown: bool,
    pub animate_new_response_text: bool,
    pub stay_awake_during_inference: bool,
    pub message_font_design: FontDesign,
    pub text_entry_font_design: FontDesign,
    pub message_font_size: u32,
    pub text_entry_font_size: u32,
    pub response_buffer_flush_interval_msec: u32,
    pub scroll_on_new_text_delay_msec: u32,
    pub sequence_list_batch_size: u32,
    pub override_system_prompt: String,
    pub override_model_template: String,
    pub seed_assistant_response: String,
    pub retrieval_policy: String,
    pub retrieval_search_args: String,
    pub autonaming_policy: AutonamingPolicy,
}
