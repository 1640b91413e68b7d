pub mod config;
pub mod converter;
pub mod engine;
pub mod location;
pub mod metrics;
pub mod profile;
pub mod testing;

pub use config::{
    load_config, load_config_from_str, load_default_config, validate_config, Config,
    ConfigError, ControllerConfig, EngineConfig,
};
pub use converter::{
    new_controller, CodecFamily, ConstructError, ControllerHandle, ConverterError, Notification,
    Notifications, RunState, SupportedCodecs,
};
pub use engine::{Engine, EngineError, FfmpegEngine, Graph};
pub use profile::{builtin_profiles, find_profile, AudioProfile, Profile};
