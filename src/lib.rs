macro_rules! debug_eprintln {
    ($($arg:tt)*) => {
        if std::env::var("CHAT_SETTINGS_DEBUG").is_ok() {
            eprintln!($($arg)*);
        }
    };
}

pub mod activity;
pub mod backend;
pub mod cache;
pub mod config;
pub mod defaults;
pub mod effective;
pub mod overrides;
pub mod render;
pub mod resolver;
pub mod sequence;
pub mod store;
pub mod submission;

pub use defaults::{AutonamingPolicy, DefaultSettings, FontDesign};
pub use effective::{DefaultsEditor, EffectiveSettings, ResolvedSettings};
pub use overrides::{InferenceSettings, OverrideSettings};
pub use resolver::{SettingsChange, SettingsResolver};
pub use sequence::{ChatMessage, ChatSequence, SequenceId};
pub use store::{KeyValueStore, KeyValueStoreExt, MemoryStore, SqliteStore};
pub use submission::{SequenceSubmitter, SubmitMode, SubmitOutcome};
