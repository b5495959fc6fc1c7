//! Environment configuration

use mlua::StdLib;

/// Settings for a new [`Environment`](crate::Environment)
#[derive(Debug, Clone)]
pub struct EnvConfig {
    /// Standard libraries opened in the runtime
    pub libraries: StdLib,
    /// Memory limit for the runtime, in bytes
    pub memory_limit: Option<usize>,
    /// Extension `run_dir` picks up (`None` runs every file).
    ///
    /// Defaults to `lua`, so notes and data files next to scripts are left
    /// alone. Use [`EnvConfig::with_any_extension`] to run every file.
    pub script_extension: Option<String>,
    /// Prefix put in front of file paths to form chunk names
    pub chunk_prefix: String,
}

impl Default for EnvConfig {
    fn default() -> Self {
        Self {
            libraries: StdLib::ALL_SAFE,
            memory_limit: None,
            script_extension: Some("lua".to_string()),
            chunk_prefix: "@".to_string(),
        }
    }
}

impl EnvConfig {
    /// Create a configuration with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the standard libraries to open.
    pub fn with_libraries(mut self, libraries: StdLib) -> Self {
        self.libraries = libraries;
        self
    }

    /// Cap the runtime's memory use.
    pub fn with_memory_limit(mut self, bytes: usize) -> Self {
        self.memory_limit = Some(bytes);
        self
    }

    /// Only run files with this extension from `run_dir`.
    pub fn with_script_extension(mut self, extension: impl Into<String>) -> Self {
        self.script_extension = Some(extension.into().trim_start_matches('.').to_string());
        self
    }

    /// Run every file from `run_dir`, whatever its extension.
    pub fn with_any_extension(mut self) -> Self {
        self.script_extension = None;
        self
    }

    /// Set the chunk-name prefix used for files.
    pub fn with_chunk_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.chunk_prefix = prefix.into();
        self
    }
}
