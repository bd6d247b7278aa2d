//! Stack-walker configuration resolved from environment variables.
//!
//! A single struct that captures every setting, resolved once at startup so
//! the propagator reads plain fields on the throw path.

use strata_core::{VmError, VmResult};

// =============================================================================
// Environment Variables
// =============================================================================

/// Log every throw, catch and unwound frame at `debug` level.
pub const ENV_TRACE_EXCEPTIONS: &str = "STRATA_TRACE_EXCEPTIONS";
/// Capture a stack trace when propagation starts.
pub const ENV_STACK_TRACES: &str = "STRATA_STACK_TRACES";
/// Print unhandled exceptions to stderr.
pub const ENV_PRINT_UNHANDLED: &str = "STRATA_PRINT_UNHANDLED";
/// Maximum number of frames recorded per stack trace.
pub const ENV_MAX_TRACE_FRAMES: &str = "STRATA_MAX_TRACE_FRAMES";

// =============================================================================
// VmConfig
// =============================================================================

/// Stack-walking and exception settings.
///
/// Immutable after construction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VmConfig {
    /// Log the search pass and every frame the propagator visits.
    pub trace_exceptions: bool,

    /// Capture a [`StackTrace`](crate::stack::StackTrace) at the throw site.
    pub capture_stack_traces: bool,

    /// Print `Exception in thread ...` when an exception escapes to native
    /// code with no handler.
    pub print_unhandled: bool,

    /// Frames kept per captured trace.
    pub max_trace_frames: usize,
}

impl Default for VmConfig {
    fn default() -> Self {
        Self {
            trace_exceptions: false,
            capture_stack_traces: true,
            print_unhandled: true,
            max_trace_frames: 1024,
        }
    }
}

impl VmConfig {
    /// Resolve from the process environment.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Resolve from an arbitrary key lookup. Unset keys keep their defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let flag = |key: &str, default: bool| match lookup(key) {
            Some(value) => Self::parse_bool(&value),
            None => default,
        };

        Self {
            trace_exceptions: flag(ENV_TRACE_EXCEPTIONS, defaults.trace_exceptions),
            capture_stack_traces: flag(ENV_STACK_TRACES, defaults.capture_stack_traces),
            print_unhandled: flag(ENV_PRINT_UNHANDLED, defaults.print_unhandled),
            max_trace_frames: lookup(ENV_MAX_TRACE_FRAMES)
                .and_then(|v| v.trim().parse::<usize>().ok())
                .unwrap_or(defaults.max_trace_frames),
        }
    }

    /// Reject inconsistent settings.
    pub fn validate(&self) -> VmResult<()> {
        if self.capture_stack_traces && self.max_trace_frames == 0 {
            return Err(VmError::Config(format!(
                "{ENV_MAX_TRACE_FRAMES} must be positive when stack traces are captured"
            )));
        }
        Ok(())
    }

    /// Builder: enable exception tracing.
    pub fn with_trace_exceptions(mut self, enabled: bool) -> Self {
        self.trace_exceptions = enabled;
        self
    }

    /// Builder: toggle unhandled-exception printing.
    pub fn with_print_unhandled(mut self, enabled: bool) -> Self {
        self.print_unhandled = enabled;
        self
    }

    /// Builder: toggle stack trace capture.
    pub fn with_stack_traces(mut self, enabled: bool) -> Self {
        self.capture_stack_traces = enabled;
        self
    }

    /// Non-empty values other than `0`, `false`, `off` and `no` are true.
    #[inline]
    fn parse_bool(value: &str) -> bool {
        let value = value.trim();
        !value.is_empty()
            && !matches!(
                value.to_ascii_lowercase().as_str(),
                "0" | "false" | "off" | "no"
            )
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults_without_environment() {
        let config = VmConfig::from_lookup(lookup(&[]));
        assert_eq!(config, VmConfig::default());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_flags_from_environment() {
        let config = VmConfig::from_lookup(lookup(&[
            (ENV_TRACE_EXCEPTIONS, "1"),
            (ENV_PRINT_UNHANDLED, "off"),
            (ENV_STACK_TRACES, "false"),
            (ENV_MAX_TRACE_FRAMES, " 16 "),
        ]));
        assert!(config.trace_exceptions);
        assert!(!config.print_unhandled);
        assert!(!config.capture_stack_traces);
        assert_eq!(config.max_trace_frames, 16);
    }

    #[test]
    fn test_unparsable_limit_keeps_default() {
        let config = VmConfig::from_lookup(lookup(&[(ENV_MAX_TRACE_FRAMES, "lots")]));
        assert_eq!(config.max_trace_frames, VmConfig::default().max_trace_frames);
    }

    #[test]
    fn test_empty_flag_is_false() {
        let config = VmConfig::from_lookup(lookup(&[(ENV_PRINT_UNHANDLED, "")]));
        assert!(!config.print_unhandled);
    }

    #[test]
    fn test_validate_rejects_zero_limit() {
        let config = VmConfig {
            max_trace_frames: 0,
            ..VmConfig::default()
        };
        assert!(matches!(config.validate(), Err(VmError::Config(_))));
        assert!(config.with_stack_traces(false).validate().is_ok());
    }

    #[test]
    fn test_builders() {
        let config = VmConfig::default()
            .with_trace_exceptions(true)
            .with_print_unhandled(false);
        assert!(config.trace_exceptions);
        assert!(!config.print_unhandled);
    }
}
