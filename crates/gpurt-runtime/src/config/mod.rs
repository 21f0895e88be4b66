use crate::memory_management::PAGE_SIZE;
use alloc::sync::Arc;

/// Static mutex holding the global configuration, initialized as `None`.
static GLOBAL_CONFIG: spin::Mutex<Option<Arc<RuntimeConfig>>> = spin::Mutex::new(None);

/// Global runtime configuration.
#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
pub struct RuntimeConfig {
    /// Sizing of command containers and their heaps.
    #[serde(default)]
    pub container: ContainerConfig,

    /// Sizing of the completion-tag pools.
    #[serde(default)]
    pub pool: TagPoolConfig,
}

/// Sizing knobs of a command container.
#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
pub struct ContainerConfig {
    /// Size of each command-buffer allocation in bytes.
    #[serde(default = "default_command_buffer_size")]
    pub command_buffer_size: u64,

    /// Initial size of each indirect heap in bytes.
    #[serde(default = "default_heap_size")]
    pub heap_size: u64,

    /// Alignment of heap backing allocations in bytes.
    #[serde(default = "default_heap_alignment")]
    pub heap_alignment: u64,
}

/// Sizing knobs of the completion-tag pools.
#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
pub struct TagPoolConfig {
    /// Number of tags sliced out of each bulk allocation.
    #[serde(default = "default_tag_count")]
    pub tag_count: u32,
}

fn default_command_buffer_size() -> u64 {
    64 * 1024
}

fn default_heap_size() -> u64 {
    64 * 1024
}

fn default_heap_alignment() -> u64 {
    PAGE_SIZE
}

fn default_tag_count() -> u32 {
    512
}

impl Default for ContainerConfig {
    fn default() -> Self {
        Self {
            command_buffer_size: default_command_buffer_size(),
            heap_size: default_heap_size(),
            heap_alignment: default_heap_alignment(),
        }
    }
}

impl Default for TagPoolConfig {
    fn default() -> Self {
        Self {
            tag_count: default_tag_count(),
        }
    }
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            container: ContainerConfig::default(),
            pool: TagPoolConfig::default(),
        }
    }
}

impl RuntimeConfig {
    /// Retrieve the current global configuration, loading it on first use.
    ///
    /// With file I/O available, the file named by `GPURT_CONFIG` (or
    /// `gpurt.toml` in the current directory) is parsed; defaults are used
    /// otherwise. The result is cached for the lifetime of the process.
    pub fn get() -> Arc<Self> {
        let mut state = GLOBAL_CONFIG.lock();
        if state.is_none() {
            #[cfg(std_io)]
            let config = Self::from_file_or_default();
            #[cfg(not(std_io))]
            let config = Self::default();

            *state = Some(Arc::new(config));
        }
        state.as_ref().cloned().unwrap()
    }

    /// Set the global configuration.
    ///
    /// # Panics
    /// Panics if the configuration was already set or read; it cannot be
    /// overridden once consumed.
    pub fn set(config: Self) {
        let mut state = GLOBAL_CONFIG.lock();
        if state.is_some() {
            panic!("Cannot set the global configuration multiple times.");
        }
        *state = Some(Arc::new(config));
    }

    #[cfg(std_io)]
    fn from_file_or_default() -> Self {
        let path =
            std::env::var("GPURT_CONFIG").unwrap_or_else(|_| alloc::string::String::from("gpurt.toml"));
        match std::fs::read_to_string(&path) {
            Ok(content) => toml::from_str(&content).unwrap_or_else(|err| {
                log::warn!("ignoring invalid config file {path}: {err}");
                Self::default()
            }),
            Err(_) => Self::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_page_aligned() {
        let config = RuntimeConfig::default();
        assert_eq!(config.container.command_buffer_size % PAGE_SIZE, 0);
        assert_eq!(config.container.heap_size % PAGE_SIZE, 0);
        assert_eq!(config.container.heap_alignment, PAGE_SIZE);
        assert!(config.pool.tag_count > 0);
    }

    #[test]
    fn partial_config_files_fall_back_to_defaults() {
        let config: RuntimeConfig = toml::from_str(
            r#"
            [container]
            heap_size = 8192
            "#,
        )
        .unwrap();
        assert_eq!(config.container.heap_size, 8192);
        assert_eq!(
            config.container.command_buffer_size,
            default_command_buffer_size()
        );
        assert_eq!(config.pool.tag_count, default_tag_count());
    }

    #[test]
    #[serial_test::serial]
    fn get_caches_the_global_config() {
        let first = RuntimeConfig::get();
        let second = RuntimeConfig::get();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(
            first.container.command_buffer_size,
            second.container.command_buffer_size
        );
    }

    #[test]
    fn config_round_trips_through_toml() {
        let config = RuntimeConfig::default();
        let serialized = toml::to_string(&config).unwrap();
        let parsed: RuntimeConfig = toml::from_str(&serialized).unwrap();
        assert_eq!(
            parsed.container.command_buffer_size,
            config.container.command_buffer_size
        );
        assert_eq!(parsed.pool.tag_count, config.pool.tag_count);
    }
}
