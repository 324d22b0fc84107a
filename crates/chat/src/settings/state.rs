use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use figment::{
    Figment,
    providers::{Env, Format, Json, Serialized},
};
use lumen_engine::{DEFAULT_MAX_TOKENS, EngineOptions, InstancePolicy};
use serde::{Deserialize, Serialize};
use snafu::{ResultExt, Snafu};

pub const SETTINGS_DIRECTORY_NAME: &str = "lumen";
pub const SETTINGS_FILE_NAME: &str = "settings.json";
pub const DATABASE_FILE_NAME: &str = "conversations.db";
pub const ENV_PREFIX: &str = "LUMEN_";

pub const DEFAULT_ASSISTANT_NAME: &str = "Lumen";
pub const DEFAULT_MAX_TURNS: usize = 20;
pub const DEFAULT_MAX_CHARACTERS: usize = 4200;
pub const DEFAULT_PUBLISH_INTERVAL_MS: u64 = 30;
pub const MAX_ABOUT_CHARS: usize = 150;
pub const MAX_CUSTOM_PERSONA_CHARS: usize = 300;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelSettings {
    /// Path to the model artifact handed to the inference program.
    pub path: String,
    pub max_tokens: u32,
    /// Keep one engine instance alive between requests instead of recreating it.
    pub reuse_instance: bool,
}

impl Default for ModelSettings {
    fn default() -> Self {
        Self {
            path: String::new(),
            max_tokens: DEFAULT_MAX_TOKENS,
            reuse_instance: false,
        }
    }
}

impl ModelSettings {
    pub fn engine_options(&self) -> EngineOptions {
        let policy = if self.reuse_instance {
            InstancePolicy::Reuse
        } else {
            InstancePolicy::Fresh
        };
        EngineOptions::new(&self.path, self.max_tokens).with_instance_policy(policy)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineCommandSettings {
    pub program: String,
    /// `{model_path}` and `{max_tokens}` are substituted per engine instance.
    pub args: Vec<String>,
}

impl Default for EngineCommandSettings {
    fn default() -> Self {
        Self {
            program: "llama-cli".to_string(),
            args: [
                "-m",
                "{model_path}",
                "-n",
                "{max_tokens}",
                "--no-display-prompt",
                "-no-cnv",
                "-f",
                "/dev/stdin",
            ]
            .into_iter()
            .map(str::to_string)
            .collect(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PersonaPreset {
    #[default]
    Friendly,
    ExecutiveCoach,
    Enthusiastic,
    Witty,
    /// Uses [`PersonaSettings::custom`], or `Friendly` when it is blank.
    Custom,
}

impl PersonaPreset {
    pub fn label(self) -> &'static str {
        match self {
            Self::Friendly => "Friendly",
            Self::ExecutiveCoach => "Executive Coach",
            Self::Enthusiastic => "Helpful & Enthusiastic",
            Self::Witty => "Witty & Sarcastic",
            Self::Custom => "Custom",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PersonaSettings {
    pub assistant_name: String,
    pub preset: PersonaPreset,
    pub custom: String,
}

impl Default for PersonaSettings {
    fn default() -> Self {
        Self {
            assistant_name: DEFAULT_ASSISTANT_NAME.to_string(),
            preset: PersonaPreset::default(),
            custom: String::new(),
        }
    }
}

/// Facts about the primary user that are mentioned in every prompt.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ProfileSettings {
    pub name: String,
    pub about: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HistorySettings {
    /// Upper bound on replayed user/assistant messages.
    pub max_turns: usize,
    /// Budget for the formatted history, counted in characters.
    pub max_characters: usize,
}

impl Default for HistorySettings {
    fn default() -> Self {
        Self {
            max_turns: DEFAULT_MAX_TURNS,
            max_characters: DEFAULT_MAX_CHARACTERS,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamingSettings {
    pub publish_interval_ms: u64,
}

impl Default for StreamingSettings {
    fn default() -> Self {
        Self {
            publish_interval_ms: DEFAULT_PUBLISH_INTERVAL_MS,
        }
    }
}

impl StreamingSettings {
    pub fn publish_interval(&self) -> Duration {
        Duration::from_millis(self.publish_interval_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageSettings {
    /// SQLite file; defaults to the platform data directory when unset.
    pub database_path: Option<PathBuf>,
}

impl StorageSettings {
    pub fn resolved_database_path(&self) -> PathBuf {
        self.database_path.clone().unwrap_or_else(|| {
            dirs::data_dir()
                .map(|path| path.join(SETTINGS_DIRECTORY_NAME))
                .unwrap_or_else(|| PathBuf::from(".lumen"))
                .join(DATABASE_FILE_NAME)
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AssistantSettings {
    pub model: ModelSettings,
    pub engine: EngineCommandSettings,
    pub persona: PersonaSettings,
    pub profile: ProfileSettings,
    pub history: HistorySettings,
    pub streaming: StreamingSettings,
    pub storage: StorageSettings,
}

impl AssistantSettings {
    pub fn normalized(mut self) -> Self {
        let defaults = Self::default();

        self.model.path = self.model.path.trim().to_string();
        if self.model.max_tokens == 0 {
            self.model.max_tokens = defaults.model.max_tokens;
        }

        self.engine.program = self.engine.program.trim().to_string();
        if self.engine.program.is_empty() {
            self.engine.program = defaults.engine.program;
        }

        self.persona.assistant_name = self.persona.assistant_name.trim().to_string();
        if self.persona.assistant_name.is_empty() {
            self.persona.assistant_name = defaults.persona.assistant_name;
        }
        self.persona.custom = truncate_chars(self.persona.custom.trim(), MAX_CUSTOM_PERSONA_CHARS);

        self.profile.name = self.profile.name.trim().to_string();
        self.profile.about = truncate_chars(self.profile.about.trim(), MAX_ABOUT_CHARS);

        if self.history.max_turns == 0 {
            self.history.max_turns = defaults.history.max_turns;
        }
        if self.history.max_characters == 0 {
            self.history.max_characters = defaults.history.max_characters;
        }
        if self.streaming.publish_interval_ms == 0 {
            self.streaming.publish_interval_ms = defaults.streaming.publish_interval_ms;
        }

        self.storage.database_path = self
            .storage
            .database_path
            .filter(|path| !path.as_os_str().is_empty());

        self
    }
}

fn truncate_chars(value: &str, limit: usize) -> String {
    value.chars().take(limit).collect()
}

/// Settings shared with running components; swapped wholesale on update.
pub type SharedSettings = Arc<ArcSwap<AssistantSettings>>;

pub struct SettingsStore {
    settings: SharedSettings,
    config_path: PathBuf,
}

impl SettingsStore {
    pub fn default_config_dir() -> PathBuf {
        dirs::config_dir()
            .map(|path| path.join(SETTINGS_DIRECTORY_NAME))
            .unwrap_or_else(|| PathBuf::from(".lumen"))
    }

    pub fn default_config_path() -> PathBuf {
        Self::default_config_dir().join(SETTINGS_FILE_NAME)
    }

    pub fn new(config_path: PathBuf) -> Self {
        let settings = Self::load_from_disk(&config_path);
        Self {
            settings: Arc::new(ArcSwap::from_pointee(settings)),
            config_path,
        }
    }

    pub fn load() -> Self {
        Self::new(Self::default_config_path())
    }

    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    pub fn settings(&self) -> Arc<AssistantSettings> {
        self.settings.load_full()
    }

    pub fn shared(&self) -> SharedSettings {
        Arc::clone(&self.settings)
    }

    /// Re-reads the file and environment, replacing the live value.
    pub fn reload(&self) -> Arc<AssistantSettings> {
        let settings = Arc::new(Self::load_from_disk(&self.config_path));
        self.settings.store(Arc::clone(&settings));
        settings
    }

    pub fn update(&self, settings: AssistantSettings) -> Result<(), SettingsError> {
        let normalized_settings = settings.normalized();
        self.persist(&normalized_settings)?;
        self.settings.store(Arc::new(normalized_settings));
        Ok(())
    }

    fn load_from_disk(path: &Path) -> AssistantSettings {
        if !path.exists() {
            tracing::info!("settings file not found at {:?}, using defaults", path);
        }

        let figment = Figment::from(Serialized::defaults(AssistantSettings::default()))
            .merge(Json::file(path))
            .merge(Env::prefixed(ENV_PREFIX).split("__"));

        match figment.extract::<AssistantSettings>() {
            Ok(settings) => settings.normalized(),
            Err(error) => {
                tracing::warn!(
                    "failed to parse settings from {:?}: {}. using defaults",
                    path,
                    error
                );
                AssistantSettings::default()
            }
        }
    }

    fn persist(&self, settings: &AssistantSettings) -> Result<(), SettingsError> {
        if let Some(parent) = self.config_path.parent() {
            std::fs::create_dir_all(parent).context(CreateDirSnafu {
                stage: "create-settings-directory",
                path: parent.to_path_buf(),
            })?;
        }

        let content = serde_json::to_string_pretty(settings).context(SerializeConfigSnafu {
            stage: "serialize-settings-json",
        })?;

        let temp_path = self.config_path.with_extension("json.tmp");
        std::fs::write(&temp_path, content).context(WriteFileSnafu {
            stage: "write-temporary-settings-file",
            path: temp_path.clone(),
        })?;

        std::fs::rename(&temp_path, &self.config_path).context(RenameTempFileSnafu {
            stage: "rename-temporary-settings-file",
            from: temp_path,
            to: self.config_path.clone(),
        })?;

        tracing::info!("saved settings to {:?}", self.config_path);
        Ok(())
    }
}

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum SettingsError {
    #[snafu(display("failed to create settings directory at {path:?} on `{stage}`: {source}"))]
    CreateDir {
        stage: &'static str,
        path: PathBuf,
        source: std::io::Error,
    },
    #[snafu(display("failed to serialize settings on `{stage}`: {source}"))]
    SerializeConfig {
        stage: &'static str,
        source: serde_json::Error,
    },
    #[snafu(display("failed to write settings file at {path:?} on `{stage}`: {source}"))]
    WriteFile {
        stage: &'static str,
        path: PathBuf,
        source: std::io::Error,
    },
    #[snafu(display(
        "failed to replace settings file from {from:?} to {to:?} on `{stage}`: {source}"
    ))]
    RenameTempFile {
        stage: &'static str,
        from: PathBuf,
        to: PathBuf,
        source: std::io::Error,
    },
}
