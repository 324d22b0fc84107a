pub mod engine;
pub mod state;

pub use engine::ConfiguredEngineFactory;
pub use state::{
    AssistantSettings, EngineCommandSettings, HistorySettings, ModelSettings, PersonaPreset,
    PersonaSettings, ProfileSettings, SettingsError, SettingsStore, SharedSettings,
    StorageSettings, StreamingSettings,
};
