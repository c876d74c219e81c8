//! Engine configuration.
//!
//! Every setting has a default and can be overridden from the environment
//! with [`EngineConfig::from_env`].

use std::env;
use std::str::FromStr;

use crate::compiler::ResolverOptions;
use crate::runner::ds::heap::HeapConfig;

pub const ENV_TRACE_INSTRUCTIONS: &str = "JUSTVM_TRACE_INSTR";
pub const ENV_ALL_VARS_ESCAPE: &str = "JUSTVM_ALL_VARS_ESCAPE";
pub const ENV_SHOW_ESCAPING_VARS: &str = "JUSTVM_SHOW_ESCAPING_VARS";
pub const ENV_MAX_HEAP_BYTES: &str = "JUSTVM_MAX_HEAP_BYTES";
pub const ENV_DISPATCH: &str = "JUSTVM_DISPATCH";

/// How the interpreter loop selects the handler for an instruction. Both
/// strategies run the same handlers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DispatchStrategy {
    #[default]
    Switch,
    JumpTable,
}

impl FromStr for DispatchStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "switch" => Ok(DispatchStrategy::Switch),
            "jump-table" | "jumptable" => Ok(DispatchStrategy::JumpTable),
            other => Err(format!("unknown dispatch strategy '{}'", other)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Emit one trace event per dispatched instruction.
    pub trace_instructions: bool,
    /// Resolver debug mode: every variable escapes.
    pub all_vars_escape: bool,
    pub show_escaping_vars: bool,
    pub heap: HeapConfig,
    pub dispatch: DispatchStrategy,
    pub write_barrier_active: bool,
    /// Script calls nested deeper than this throw a RangeError.
    pub max_call_depth: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            trace_instructions: false,
            all_vars_escape: false,
            show_escaping_vars: false,
            heap: HeapConfig::default(),
            dispatch: DispatchStrategy::default(),
            write_barrier_active: true,
            max_call_depth: 400,
        }
    }
}

impl EngineConfig {
    /// Defaults overridden by the `JUSTVM_*` environment variables. Values that
    /// do not parse are ignored with a warning.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let flag = |key: &str| lookup(key).map(|v| !v.is_empty() && v != "0").unwrap_or(false);
        let mut config = EngineConfig {
            trace_instructions: flag(ENV_TRACE_INSTRUCTIONS),
            all_vars_escape: flag(ENV_ALL_VARS_ESCAPE),
            show_escaping_vars: flag(ENV_SHOW_ESCAPING_VARS),
            ..EngineConfig::default()
        };
        if let Some(v) = lookup(ENV_MAX_HEAP_BYTES) {
            match v.parse::<usize>() {
                Ok(max) => config.heap = HeapConfig::with_limit(max),
                Err(_) => tracing::warn!("ignoring {}={:?}: not a byte count", ENV_MAX_HEAP_BYTES, v),
            }
        }
        if let Some(v) = lookup(ENV_DISPATCH) {
            match v.parse() {
                Ok(d) => config.dispatch = d,
                Err(e) => tracing::warn!("ignoring {}: {}", ENV_DISPATCH, e),
            }
        }
        config
    }

    pub fn resolver_options(&self) -> ResolverOptions {
        ResolverOptions {
            debug_mode: self.all_vars_escape,
            show_escaping_vars: self.show_escaping_vars,
            strict: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(vars: &[(&str, &str)]) -> EngineConfig {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        EngineConfig::from_lookup(|k| vars.get(k).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = config_from(&[]);
        assert!(!config.trace_instructions);
        assert!(config.write_barrier_active);
        assert_eq!(config.dispatch, DispatchStrategy::Switch);
        assert_eq!(config.heap.max_bytes, None);
    }

    #[test]
    fn test_env_overrides() {
        let config = config_from(&[
            (ENV_TRACE_INSTRUCTIONS, "1"),
            (ENV_ALL_VARS_ESCAPE, "0"),
            (ENV_MAX_HEAP_BYTES, "4096"),
            (ENV_DISPATCH, "jump-table"),
        ]);
        assert!(config.trace_instructions);
        assert!(!config.all_vars_escape);
        assert_eq!(config.heap.max_bytes, Some(4096));
        assert_eq!(config.dispatch, DispatchStrategy::JumpTable);
    }

    #[test]
    fn test_bad_values_are_ignored() {
        let config = config_from(&[(ENV_MAX_HEAP_BYTES, "lots"), (ENV_DISPATCH, "goto")]);
        assert_eq!(config.heap.max_bytes, None);
        assert_eq!(config.dispatch, DispatchStrategy::Switch);
    }

    #[test]
    fn test_resolver_options_follow_config() {
        let config = EngineConfig {
            all_vars_escape: true,
            ..EngineConfig::default()
        };
        assert!(config.resolver_options().debug_mode);
    }
}
