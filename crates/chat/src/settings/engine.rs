use lumen_engine::{
    CommandEngineFactory, EngineFactory, EngineOptions, EngineResult, InferenceEngine,
};

use super::state::SharedSettings;

/// Engine factory that reads `engine.program` and `engine.args` from the live
/// settings each time an instance is created, so a reload takes effect on the
/// next request.
#[derive(Clone)]
pub struct ConfiguredEngineFactory {
    settings: SharedSettings,
}

impl ConfiguredEngineFactory {
    pub fn new(settings: SharedSettings) -> Self {
        Self { settings }
    }
}

impl EngineFactory for ConfiguredEngineFactory {
    fn create(&self, options: &EngineOptions) -> EngineResult<Box<dyn InferenceEngine>> {
        let settings = self.settings.load();
        CommandEngineFactory::new(settings.engine.program.clone(), settings.engine.args.clone())
            .create(options)
    }
}
