//! Per-sequence settings records.
//!
//! `None` always means "inherit". Serialization skips unset fields so a
//! stored record never materializes a value it did not have.

use serde::{Deserialize, Serialize};

use crate::defaults::{AutonamingPolicy, FontDesign};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OverrideSettings {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub allow_continuation: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub show_separate_retrieval_button: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub force_retrieval: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub show_message_headers: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub render_as_markdown: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub animate_new_response_text: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stay_awake_during_inference: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message_font_design: Option<FontDesign>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text_entry_font_design: Option<FontDesign>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message_font_size: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text_entry_font_size: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_buffer_flush_interval_msec: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scroll_on_new_text_delay_msec: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sequence_list_batch_size: Option<u32>,
}

impl OverrideSettings {
    pub fn is_empty(&self) -> bool {
        *self == OverrideSettings::default()
    }

    pub fn clear(&mut self) {
        *self = OverrideSettings::default();
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct InferenceSettings {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub override_system_prompt: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub override_model_template: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seed_assistant_response: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retrieval_policy: Option<String>,
    /// Passed through to the backend untouched; usually a JSON object.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retrieval_search_args: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub autonaming_policy: Option<AutonamingPolicy>,
}

impl InferenceSettings {
    pub fn is_empty(&self) -> bool {
        *self == InferenceSettings::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_override_serializes_to_empty_object() {
        let json = serde_json::to_string(&OverrideSettings::default()).unwrap();
        assert_eq!(json, "{}");
    }

    #[test]
    fn test_unset_fields_survive_round_trip() {
        let mut o = OverrideSettings::default();
        o.force_retrieval = Some(true);
        o.message_font_design = Some(FontDesign::Serif);

        let json = serde_json::to_string(&o).unwrap();
        assert!(!json.contains("allow_continuation"));

        let back: OverrideSettings = serde_json::from_str(&json).unwrap();
        assert_eq!(back, o);
        assert_eq!(back.allow_continuation, None);
        assert_eq!(back.message_font_size, None);
    }

    #[test]
    fn test_explicit_false_is_not_unset() {
        let mut o = OverrideSettings::default();
        o.allow_continuation = Some(false);
        let back: OverrideSettings = serde_json::from_str(&serde_json::to_string(&o).unwrap()).unwrap();
        assert_eq!(back.allow_continuation, Some(false));
        assert!(!back.is_empty());
    }

    #[test]
    fn test_clear_resets_everything() {
        let mut o = OverrideSettings {
            render_as_markdown: Some(false),
            sequence_list_batch_size: Some(5),
            ..Default::default()
        };
        o.clear();
        assert!(o.is_empty());
    }

    #[test]
    fn test_inference_empty_string_is_kept() {
        let i = InferenceSettings {
            override_system_prompt: Some(String::new()),
            autonaming_policy: Some(AutonamingPolicy::Disable),
            ..Default::default()
        };
        let json = serde_json::to_string(&i).unwrap();
        let back: InferenceSettings = serde_json::from_str(&json).unwrap();
        assert_eq!(back.override_system_prompt, Some(String::new()));
        assert_eq!(back.retrieval_policy, None);
        assert_eq!(back.autonaming_policy, Some(AutonamingPolicy::Disable));
    }
}
