pub mod settings;
pub mod user;

pub use settings::{
    BridgeSettings, DEFAULT_PORT, DEFAULT_SESSION_OPTION, DeviceSettings, GatewaySettings,
    TimeoutSettings,
};
pub use user::{load_config_file, load_user_config, user_config_path};
