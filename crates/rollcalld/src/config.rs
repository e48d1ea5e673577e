use rollcall_core::{Config, ConfigError};

/// Daemon configuration: the engine settings plus bus selection.
pub struct DaemonConfig {
    pub engine: Config,
    /// Serve on the session bus instead of the system bus.
    pub session_bus: bool,
}

impl DaemonConfig {
    /// Load engine settings via [`Config::load`] and read `ROLLCALL_SESSION_BUS`.
    pub fn load() -> Result<Self, ConfigError> {
        Ok(Self {
            engine: Config::load()?,
            session_bus: session_bus_enabled(std::env::var("ROLLCALL_SESSION_BUS").ok().as_deref()),
        })
    }
}

fn session_bus_enabled(value: Option<&str>) -> bool {
    matches!(value.map(str::trim), Some("1") | Some("true") | Some("yes"))
}
