//! Config Module - ICE Server, Fehlermeldung und Logging

mod settings;

pub use settings::{
    default_ice_servers, ConfigError, FailureReporting, IceServerConfig, LoopbackConfig,
    DEFAULT_LOG_FILTER, DEFAULT_STUN_SERVER,
};
