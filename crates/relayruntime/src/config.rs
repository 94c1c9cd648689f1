use relaycore::{ProcessRole, ReadyOptions};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration for an engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Role of the process this engine runs in
    pub role: ProcessRole,
    /// How long background waits for the active tab to finish loading
    pub target_ready_timeout_ms: u64,
    pub fail_on_target_error: bool,
    /// `tabLoadTimeout` passed to the bootstrap `NewTab`
    pub init_tab_timeout_ms: u64,
    /// Pause before each step of a task that does not set its own delay
    pub step_delay_ms: u64,
}

impl EngineConfig {
    pub fn for_role(role: ProcessRole) -> Self {
        Self {
            role,
            ..Self::default()
        }
    }

    pub fn ready_options(&self) -> ReadyOptions {
        ReadyOptions {
            timeout: Duration::from_millis(self.target_ready_timeout_ms),
            fail_on_error: self.fail_on_target_error,
        }
    }

    pub fn step_delay(&self) -> Duration {
        Duration::from_millis(self.step_delay_ms)
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            role: ProcessRole::Web,
            target_ready_timeout_ms: 10_000,
            fail_on_target_error: false,
            init_tab_timeout_ms: 30_000,
            step_delay_ms: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_partial_config_uses_defaults() {
        let config: EngineConfig =
            serde_json::from_value(json!({ "role": "background", "step_delay_ms": 50 })).unwrap();

        assert_eq!(config.role, ProcessRole::Background);
        assert_eq!(config.step_delay(), Duration::from_millis(50));
        assert_eq!(config.init_tab_timeout_ms, 30_000);
        assert_eq!(config.ready_options().timeout, Duration::from_secs(10));
    }
}
