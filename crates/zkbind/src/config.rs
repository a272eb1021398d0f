use once_cell::sync::OnceCell;
use zkbind_native_core::{env_bool, env_i32, env_string, env_u32_nonzero, ZOO_LOG_LEVEL_INFO};

const DEFAULT_REGISTRY_CAPACITY: u32 = 65_536;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BindConfig {
    pub registry_capacity: usize,
    pub log_level: i32,
    pub log_file: Option<String>,
    pub deterministic_conn_order: bool,
}

impl Default for BindConfig {
    fn default() -> Self {
        BindConfig {
            registry_capacity: DEFAULT_REGISTRY_CAPACITY as usize,
            log_level: ZOO_LOG_LEVEL_INFO,
            log_file: None,
            deterministic_conn_order: false,
        }
    }
}

impl BindConfig {
    pub fn from_env() -> BindConfig {
        BindConfig {
            registry_capacity: env_u32_nonzero(
                "ZKBIND_REGISTRY_CAPACITY",
                DEFAULT_REGISTRY_CAPACITY,
            ) as usize,
            log_level: env_i32("ZKBIND_LOG_LEVEL", ZOO_LOG_LEVEL_INFO),
            log_file: env_string("ZKBIND_LOG_FILE"),
            deterministic_conn_order: env_bool("ZKBIND_DETERMINISTIC_CONN_ORDER", false),
        }
    }
}

static CONFIG: OnceCell<BindConfig> = OnceCell::new();

/// Process configuration, read from the environment on first use.
pub fn config() -> &'static BindConfig {
    CONFIG.get_or_init(BindConfig::from_env)
}
