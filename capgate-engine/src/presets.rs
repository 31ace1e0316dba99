//! Host configuration and ready-made presets

use std::path::PathBuf;
use std::sync::Arc;

use crate::audit::{AuditSink, FileAuditSink, MemoryAuditSink, NullAuditSink};

/// Rounds a single task may issue before it is finished regardless
pub const DEFAULT_ROUND_LIMIT: usize = 16;

/// Configuration of a [`RequestHost`](crate::host::RequestHost)
#[derive(Clone)]
pub struct HostConfig {
    /// Application name (used for default paths and log fields)
    pub app_name: String,
    pub audit: Arc<dyn AuditSink>,
    /// Upper bound on grant rounds per task
    ///
    /// A user who keeps accepting the rationale while the platform keeps
    /// refusing would otherwise loop forever.
    pub round_limit: usize,
}

impl std::fmt::Debug for HostConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HostConfig")
            .field("app_name", &self.app_name)
            .field("round_limit", &self.round_limit)
            .finish_non_exhaustive()
    }
}

impl HostConfig {
    pub fn new(app_name: impl Into<String>, audit: impl AuditSink + 'static) -> Self {
        Self {
            app_name: app_name.into(),
            audit: Arc::new(audit),
            round_limit: DEFAULT_ROUND_LIMIT,
        }
    }

    pub fn builder() -> HostConfigBuilder {
        HostConfigBuilder::new()
    }
}

impl Default for HostConfig {
    fn default() -> Self {
        HostPresets::quiet()
    }
}

/// Builder for host configurations
pub struct HostConfigBuilder {
    app_name: Option<String>,
    audit: Option<Arc<dyn AuditSink>>,
    audit_path: Option<PathBuf>,
    round_limit: usize,
}

impl HostConfigBuilder {
    pub fn new() -> Self {
        Self {
            app_name: None,
            audit: None,
            audit_path: None,
            round_limit: DEFAULT_ROUND_LIMIT,
        }
    }

    /// Set the application name
    pub fn app_name(mut self, name: impl Into<String>) -> Self {
        self.app_name = Some(name.into());
        self
    }

    /// Set the audit sink
    pub fn audit(mut self, audit: impl AuditSink + 'static) -> Self {
        self.audit = Some(Arc::new(audit));
        self
    }

    /// Set a shared audit sink (keeps a handle for inspection)
    pub fn shared_audit(mut self, audit: Arc<dyn AuditSink>) -> Self {
        self.audit = Some(audit);
        self
    }

    /// Write the audit trail as JSONL to `path`
    pub fn audit_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.audit_path = Some(path.into());
        self
    }

    pub fn round_limit(mut self, limit: usize) -> Self {
        self.round_limit = limit;
        self
    }

    /// Build the configuration
    pub fn build(self) -> Result<HostConfig, PresetError> {
        if self.round_limit == 0 {
            return Err(PresetError::InvalidConfig(
                "round limit must be at least 1".into(),
            ));
        }
        if self.audit.is_some() && self.audit_path.is_some() {
            return Err(PresetError::InvalidConfig(
                "audit sink and audit file are mutually exclusive".into(),
            ));
        }

        let audit: Arc<dyn AuditSink> = match (self.audit, self.audit_path) {
            (Some(audit), _) => audit,
            (None, Some(path)) => {
                let sink =
                    FileAuditSink::new(path).map_err(|e| PresetError::AuditInit(e.to_string()))?;
                Arc::new(sink)
            }
            (None, None) => Arc::new(NullAuditSink),
        };

        Ok(HostConfig {
            app_name: self.app_name.unwrap_or_else(|| "capgate".to_string()),
            audit,
            round_limit: self.round_limit,
        })
    }
}

impl Default for HostConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Error type for configuration
#[derive(Debug, thiserror::Error)]
pub enum PresetError {
    #[error("Failed to initialize audit: {0}")]
    AuditInit(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

// ============================================================================
// Preset Configurations
// ============================================================================

/// Preset configurations for common use cases
pub struct HostPresets;

impl HostPresets {
    /// Production host
    ///
    /// - File-based audit log under the user config directory
    /// - Default round limit
    pub fn production(app_name: &str) -> Result<HostConfig, PresetError> {
        let config_dir = dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from(".config"))
            .join(app_name);

        let audit = FileAuditSink::new(config_dir.join("audit.jsonl"))
            .map_err(|e| PresetError::AuditInit(e.to_string()))?;

        Ok(HostConfig::new(app_name, audit))
    }

    /// Testing host
    ///
    /// - Memory audit sink
    /// - Low round limit so runaway scripts finish quickly
    pub fn testing() -> HostConfig {
        HostConfig {
            app_name: "capgate-test".to_string(),
            audit: Arc::new(MemoryAuditSink::new()),
            round_limit: 4,
        }
    }

    /// Host without an audit trail
    pub fn quiet() -> HostConfig {
        HostConfig::new("capgate", NullAuditSink)
    }
}
