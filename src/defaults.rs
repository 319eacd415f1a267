//! Application-wide default settings.
//!
//! Every field has a concrete value here. Per-sequence overrides only store
//! differences and fall back to these.

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::store::{KeyValueStore, KeyValueStoreExt};

const KEY_PREFIX: &str = "default_ui";

pub fn storage_key(field: &str) -> String {
    format!("{}.{}", KEY_PREFIX, field)
}

/// Typeface family used for message bodies and the text entry field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum FontDesign {
    #[default]
    Default,
    Monospaced,
    Rounded,
    Serif,
}

impl FontDesign {
    pub const ALL: [FontDesign; 4] = [
        FontDesign::Default,
        FontDesign::Monospaced,
        FontDesign::Rounded,
        FontDesign::Serif,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            FontDesign::Default => "default",
            FontDesign::Monospaced => "monospaced",
            FontDesign::Rounded => "rounded",
            FontDesign::Serif => "serif",
        }
    }

    /// Unrecognized names resolve to `FontDesign::Default`.
    pub fn from_name(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "monospaced" => FontDesign::Monospaced,
            "rounded" => FontDesign::Rounded,
            "serif" => FontDesign::Serif,
            _ => FontDesign::Default,
        }
    }
}

impl From<String> for FontDesign {
    fn from(s: String) -> Self {
        FontDesign::from_name(&s)
    }
}

impl From<FontDesign> for String {
    fn from(design: FontDesign) -> Self {
        design.as_str().to_string()
    }
}

/// When, if ever, a sequence gets an automatically generated title.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum AutonamingPolicy {
    Disable,
    /// Name the sequence once the first response has finished.
    #[default]
    SummarizeAfter,
    /// Name the sequence before inference starts.
    SummarizeBefore,
}

impl AutonamingPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            AutonamingPolicy::Disable => "disable",
            AutonamingPolicy::SummarizeAfter => "summarize_after",
            AutonamingPolicy::SummarizeBefore => "summarize_before",
        }
    }

    pub fn from_name(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "disable" => AutonamingPolicy::Disable,
            "summarize_before" => AutonamingPolicy::SummarizeBefore,
            _ => AutonamingPolicy::SummarizeAfter,
        }
    }
}

impl From<String> for AutonamingPolicy {
    fn from(s: String) -> Self {
        AutonamingPolicy::from_name(&s)
    }
}

impl From<AutonamingPolicy> for String {
    fn from(policy: AutonamingPolicy) -> Self {
        policy.as_str().to_string()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DefaultSettings {
    pub allow_continuation: bool,
    pub show_separate_retrieval_button: bool,
    pub force_retrieval: bool,
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
    pub autonaming_policy: AutonamingPolicy,
}

impl Default for DefaultSettings {
    fn default() -> Self {
        DefaultSettings {
            allow_continuation: true,
            show_separate_retrieval_button: true,
            force_retrieval: false,
            show_message_headers: false,
            render_as_markdown: true,
            animate_new_response_text: false,
            stay_awake_during_inference: true,
            message_font_design: FontDesign::Default,
            text_entry_font_design: FontDesign::Default,
            message_font_size: 12,
            text_entry_font_size: 12,
            response_buffer_flush_interval_msec: 250,
            scroll_on_new_text_delay_msec: 250,
            sequence_list_batch_size: 48,
            autonaming_policy: AutonamingPolicy::SummarizeAfter,
        }
    }
}

impl DefaultSettings {
    /// Read every field from `store`, using the built-in default for anything missing.
    pub fn load(store: &dyn KeyValueStore) -> Self {
        let d = DefaultSettings::default();
        DefaultSettings {
            allow_continuation: store.get(&storage_key("allow_continuation"), d.allow_continuation),
            show_separate_retrieval_button: store.get(
                &storage_key("show_separate_retrieval_button"),
                d.show_separate_retrieval_button,
            ),
            force_retrieval: store.get(&storage_key("force_retrieval"), d.force_retrieval),
            show_message_headers: store.get(&storage_key("show_message_headers"), d.show_message_headers),
            render_as_markdown: store.get(&storage_key("render_as_markdown"), d.render_as_markdown),
            animate_new_response_text: store.get(
                &storage_key("animate_new_response_text"),
                d.animate_new_response_text,
            ),
            stay_awake_during_inference: store.get(
                &storage_key("stay_awake_during_inference"),
                d.stay_awake_during_inference,
            ),
            message_font_design: store.get(&storage_key("message_font_design"), d.message_font_design),
            text_entry_font_design: store.get(
                &storage_key("text_entry_font_design"),
                d.text_entry_font_design,
            ),
            message_font_size: store.get(&storage_key("message_font_size"), d.message_font_size),
            text_entry_font_size: store.get(&storage_key("text_entry_font_size"), d.text_entry_font_size),
            response_buffer_flush_interval_msec: store.get(
                &storage_key("response_buffer_flush_interval_msec"),
                d.response_buffer_flush_interval_msec,
            ),
            scroll_on_new_text_delay_msec: store.get(
                &storage_key("scroll_on_new_text_delay_msec"),
                d.scroll_on_new_text_delay_msec,
            ),
            sequence_list_batch_size: store.get(
                &storage_key("sequence_list_batch_size"),
                d.sequence_list_batch_size,
            ),
            autonaming_policy: store.get(&storage_key("autonaming_policy"), d.autonaming_policy),
        }
    }

    /// Write every field, e.g. after resetting to factory defaults.
    pub fn persist_all(&self, store: &dyn KeyValueStore) -> Result<()> {
        store.set(&storage_key("allow_continuation"), &self.allow_continuation)?;
        store.set(&storage_key("show_separate_retrieval_button"), &self.show_separate_retrieval_button)?;
        store.set(&storage_key("force_retrieval"), &self.force_retrieval)?;
        store.set(&storage_key("show_message_headers"), &self.show_message_headers)?;
        store.set(&storage_key("render_as_markdown"), &self.render_as_markdown)?;
        store.set(&storage_key("animate_new_response_text"), &self.animate_new_response_text)?;
        store.set(&storage_key("stay_awake_during_inference"), &self.stay_awake_during_inference)?;
        store.set(&storage_key("message_font_design"), &self.message_font_design)?;
        store.set(&storage_key("text_entry_font_design"), &self.text_entry_font_design)?;
        store.set(&storage_key("message_font_size"), &self.message_font_size)?;
        store.set(&storage_key("text_entry_font_size"), &self.text_entry_font_size)?;
        store.set(
            &storage_key("response_buffer_flush_interval_msec"),
            &self.response_buffer_flush_interval_msec,
        )?;
        store.set(&storage_key("scroll_on_new_text_delay_msec"), &self.scroll_on_new_text_delay_msec)?;
        store.set(&storage_key("sequence_list_batch_size"), &self.sequence_list_batch_size)?;
        store.set(&storage_key("autonaming_policy"), &self.autonaming_policy)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MemoryStore, SqliteStore};

    #[test]
    fn test_unknown_font_design_resolves_to_default() {
        assert_eq!(FontDesign::from_name("comic-sans"), FontDesign::Default);
        assert_eq!(FontDesign::from_name(" Serif "), FontDesign::Serif);

        let decoded: FontDesign = serde_json::from_str("\"handwriting\"").unwrap();
        assert_eq!(decoded, FontDesign::Default);
    }

    #[test]
    fn test_font_design_names_round_trip() {
        for design in FontDesign::ALL {
            let encoded = serde_json::to_string(&design).unwrap();
            let decoded: FontDesign = serde_json::from_str(&encoded).unwrap();
            assert_eq!(decoded, design);
        }
    }

    #[test]
    fn test_unknown_autonaming_policy_falls_back() {
        assert_eq!(AutonamingPolicy::from_name("whenever"), AutonamingPolicy::SummarizeAfter);
        assert_eq!(AutonamingPolicy::from_name("disable"), AutonamingPolicy::Disable);
    }

    #[test]
    fn test_load_from_empty_store_is_default() {
        let store = MemoryStore::new();
        assert_eq!(DefaultSettings::load(&store), DefaultSettings::default());
    }

    #[test]
    fn test_load_reads_stored_fields() {
        let store = MemoryStore::new();
        store.set(&storage_key("allow_continuation"), &false).unwrap();
        store.set(&storage_key("message_font_design"), &FontDesign::Monospaced).unwrap();
        store.set_raw(&storage_key("text_entry_font_design"), "\"papyrus\"").unwrap();
        store.set_raw(&storage_key("message_font_size"), "\"large\"").unwrap();

        let loaded = DefaultSettings::load(&store);
        assert!(!loaded.allow_continuation);
        assert_eq!(loaded.message_font_design, FontDesign::Monospaced);
        assert_eq!(loaded.text_entry_font_design, FontDesign::Default);
        assert_eq!(loaded.message_font_size, 12);
        assert!(loaded.show_separate_retrieval_button);
    }

    #[test]
    fn test_persist_all_then_load() {
        let store = SqliteStore::open_in_memory().unwrap();
        let mut custom = DefaultSettings::default();
        custom.render_as_markdown = false;
        custom.sequence_list_batch_size = 10;
        custom.autonaming_policy = AutonamingPolicy::Disable;
        custom.persist_all(&store).unwrap();

        assert_eq!(DefaultSettings::load(&store), custom);
    }
}
