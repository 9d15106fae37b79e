//! Core policy configuration
//!
//! Everything here is injected through a [`ConfigHandle`] so that each
//! application state (and each test) carries its own isolated policy.

use chrono::Duration;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use crate::error::{AppError, Result};

/// How many leading characters of a code a role may see
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MaskRule {
    /// Visible characters for codes flagged public
    pub visible_public: usize,
    /// Visible characters for codes flagged private
    pub visible_private: usize,
}

impl MaskRule {
    pub fn visible(&self, is_public: bool) -> usize {
        if is_public {
            self.visible_public
        } else {
            self.visible_private
        }
    }
}

/// Role-keyed masking table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MaskingPolicy {
    pub mask_char: char,
    pub rules: BTreeMap<String, MaskRule>,
    /// Applied to any role missing from `rules`
    pub fallback: MaskRule,
}

impl MaskingPolicy {
    pub fn rule_for(&self, role: &str) -> MaskRule {
        self.rules.get(role).copied().unwrap_or(self.fallback)
    }
}

impl Default for MaskingPolicy {
    fn default() -> Self {
        let mut rules = BTreeMap::new();
        rules.insert(
            "manager".to_string(),
            MaskRule {
                visible_public: 6,
                visible_private: 6,
            },
        );
        rules.insert(
            "courier".to_string(),
            MaskRule {
                visible_public: 4,
                visible_private: 2,
            },
        );
        rules.insert(
            "anonymous".to_string(),
            MaskRule {
                visible_public: 2,
                visible_private: 0,
            },
        );
        Self {
            mask_char: '*',
            rules,
            fallback: MaskRule {
                visible_public: 0,
                visible_private: 0,
            },
        }
    }
}

/// What a courier's cancel does to a task it holds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CancelPolicy {
    /// Task goes back to `available` with no assignee
    Release,
    /// Task becomes `cancelled`
    Terminate,
}

/// Longest accepted task or in-progress TTL: ten years
pub const MAX_TTL_SECS: i64 = 10 * 366 * 24 * 60 * 60;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoreConfig {
    pub masking: MaskingPolicy,
    pub courier_cancel: CancelPolicy,
    pub default_task_ttl_secs: i64,
    /// Expiry for claimed tasks measured from `claimed_at`; `None` means claimed tasks never expire
    pub in_progress_ttl_secs: Option<i64>,
    pub max_active_tasks: u32,
    pub sweep_interval_secs: u64,
    /// Re-reads allowed when a non-claim write loses a version check
    pub max_write_retries: u32,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            masking: MaskingPolicy::default(),
            courier_cancel: CancelPolicy::Release,
            default_task_ttl_secs: 3600,
            in_progress_ttl_secs: None,
            max_active_tasks: 5,
            sweep_interval_secs: 60,
            max_write_retries: 3,
        }
    }
}

impl CoreConfig {
    pub fn from_json_str(raw: &str) -> Result<Self> {
        let config: CoreConfig =
            serde_json::from_str(raw).map_err(|e| AppError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| AppError::Config(format!("{}: {}", path.display(), e)))?;
        Self::from_json_str(&raw)
    }

    pub fn validate(&self) -> Result<()> {
        if !(1..=MAX_TTL_SECS).contains(&self.default_task_ttl_secs) {
            return Err(AppError::Config(format!(
                "default_task_ttl_secs must be between 1 and {}",
                MAX_TTL_SECS
            )));
        }
        if matches!(self.in_progress_ttl_secs, Some(secs) if !(1..=MAX_TTL_SECS).contains(&secs)) {
            return Err(AppError::Config(format!(
                "in_progress_ttl_secs must be between 1 and {} when set",
                MAX_TTL_SECS
            )));
        }
        if self.max_active_tasks == 0 {
            return Err(AppError::Config(
                "max_active_tasks must be at least 1".to_string(),
            ));
        }
        if self.sweep_interval_secs == 0 {
            return Err(AppError::Config(
                "sweep_interval_secs must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Clamped to the accepted range even for a config that skipped `validate`
    pub fn default_task_ttl(&self) -> Duration {
        Duration::seconds(self.default_task_ttl_secs.clamp(1, MAX_TTL_SECS))
    }

    pub fn in_progress_ttl(&self) -> Option<Duration> {
        self.in_progress_ttl_secs
            .map(|secs| Duration::seconds(secs.clamp(1, MAX_TTL_SECS)))
    }

    pub fn sweep_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.sweep_interval_secs)
    }
}

/// Shared, reloadable view of the current [`CoreConfig`]
#[derive(Debug)]
pub struct ConfigHandle {
    current: RwLock<Arc<CoreConfig>>,
    source: Option<PathBuf>,
}

impl ConfigHandle {
    pub fn new(config: CoreConfig) -> Self {
        Self {
            current: RwLock::new(Arc::new(config)),
            source: None,
        }
    }

    /// Load from a JSON file and remember it for `reload_from_source`
    pub fn from_path(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let config = CoreConfig::load(&path)?;
        Ok(Self {
            current: RwLock::new(Arc::new(config)),
            source: Some(path),
        })
    }

    /// Snapshot of the active configuration
    pub fn current(&self) -> Arc<CoreConfig> {
        match self.current.read() {
            Ok(guard) => Arc::clone(&guard),
            Err(poisoned) => Arc::clone(&poisoned.into_inner()),
        }
    }

    /// Swap in a new configuration; in-flight operations keep their snapshot
    pub fn reload(&self, config: CoreConfig) -> Result<Arc<CoreConfig>> {
        config.validate()?;
        let config = Arc::new(config);
        let mut guard = match self.current.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        *guard = Arc::clone(&config);
        tracing::info!("Core configuration reloaded");
        Ok(config)
    }

    /// Re-read the file this handle was created from
    pub fn reload_from_source(&self) -> Result<Arc<CoreConfig>> {
        let path = self
            .source
            .as_ref()
            .ok_or_else(|| AppError::Config("no configuration file to reload from".to_string()))?;
        self.reload(CoreConfig::load(path)?)
    }
}

impl Default for ConfigHandle {
    fn default() -> Self {
        Self::new(CoreConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(CoreConfig::default().validate().is_ok());
    }

    #[test]
    fn test_rule_for_unknown_role_uses_fallback() {
        let policy = MaskingPolicy::default();
        assert_eq!(policy.rule_for("auditor"), policy.fallback);
        assert_eq!(policy.rule_for("manager").visible(false), 6);
    }

    #[test]
    fn test_partial_json_fills_defaults() {
        let config = CoreConfig::from_json_str(
            r#"{"courier_cancel": "terminate", "max_active_tasks": 2}"#,
        )
        .unwrap();
        assert_eq!(config.courier_cancel, CancelPolicy::Terminate);
        assert_eq!(config.max_active_tasks, 2);
        assert_eq!(config.default_task_ttl_secs, 3600);
        assert!(config.masking.rules.contains_key("manager"));
    }

    #[test]
    fn test_json_masking_table() {
        let config = CoreConfig::from_json_str(
            r#"{"masking": {"rules": {"auditor": {"visible_public": 6, "visible_private": 4}}}}"#,
        )
        .unwrap();
        assert_eq!(config.masking.rule_for("auditor").visible(false), 4);
        // A replaced table drops the default roles
        assert_eq!(config.masking.rule_for("manager"), config.masking.fallback);
    }

    #[test]
    fn test_invalid_values_rejected() {
        assert!(CoreConfig::from_json_str(r#"{"max_active_tasks": 0}"#).is_err());
        assert!(CoreConfig::from_json_str(r#"{"in_progress_ttl_secs": -5}"#).is_err());
        assert!(CoreConfig::from_json_str("not json").is_err());
    }

    #[test]
    fn test_oversized_ttls_rejected() {
        let huge = format!(r#"{{"in_progress_ttl_secs": {}}}"#, i64::MAX);
        assert!(matches!(
            CoreConfig::from_json_str(&huge),
            Err(AppError::Config(_))
        ));
        let huge = format!(r#"{{"default_task_ttl_secs": {}}}"#, MAX_TTL_SECS + 1);
        assert!(matches!(
            CoreConfig::from_json_str(&huge),
            Err(AppError::Config(_))
        ));

        let handle = ConfigHandle::default();
        let mut bad = CoreConfig::default();
        bad.in_progress_ttl_secs = Some(10_000_000_000_000);
        assert!(handle.reload(bad).is_err());
        assert_eq!(handle.current().in_progress_ttl_secs, None);
    }

    #[test]
    fn test_ttl_accessors_clamp_unvalidated_values() {
        let config = CoreConfig {
            default_task_ttl_secs: i64::MAX,
            in_progress_ttl_secs: Some(i64::MIN),
            ..CoreConfig::default()
        };
        assert_eq!(config.default_task_ttl(), Duration::seconds(MAX_TTL_SECS));
        assert_eq!(config.in_progress_ttl(), Some(Duration::seconds(1)));
    }

    #[test]
    fn test_handle_reload_swaps_snapshot() {
        let handle = ConfigHandle::default();
        let before = handle.current();
        let mut next = CoreConfig::default();
        next.max_active_tasks = 9;
        handle.reload(next).unwrap();

        assert_eq!(before.max_active_tasks, 5);
        assert_eq!(handle.current().max_active_tasks, 9);
    }

    #[test]
    fn test_handle_reload_rejects_invalid() {
        let handle = ConfigHandle::default();
        let mut bad = CoreConfig::default();
        bad.sweep_interval_secs = 0;
        assert!(handle.reload(bad).is_err());
        assert_eq!(handle.current().sweep_interval_secs, 60);
    }

    #[test]
    fn test_reload_from_source_without_file() {
        let handle = ConfigHandle::default();
        assert!(matches!(
            handle.reload_from_source(),
            Err(AppError::Config(_))
        ));
    }

    #[test]
    fn test_from_path_and_reload() {
        let path = std::env::temp_dir().join(format!("campost-config-{}.json", uuid::Uuid::new_v4()));
        std::fs::write(&path, r#"{"max_active_tasks": 3}"#).unwrap();
        let handle = ConfigHandle::from_path(&path).unwrap();
        assert_eq!(handle.current().max_active_tasks, 3);

        std::fs::write(&path, r#"{"max_active_tasks": 7}"#).unwrap();
        handle.reload_from_source().unwrap();
        assert_eq!(handle.current().max_active_tasks, 7);

        std::fs::remove_file(&path).ok();
    }
}
