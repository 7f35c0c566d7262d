//! Safe-mode capability.
//!
//! Safe mode is a posture, not a feature flag read from the environment: the
//! budget allocator and the parameter guard consult an injected [`SafeMode`]
//! capability at call time, so tests and callers can supply either state
//! without process-wide mutation. Snapshots of ambient state belong in
//! [`crate::config::SafetyConfig::from_env`], taken once at composition time.

/// Token ceiling applied to any budget while safe mode is active.
pub const SAFE_MODE_TOKEN_CEILING: usize = 8_000;

/// Minimum response reservation enforced while safe mode is active.
pub const SAFE_MODE_RESPONSE_RESERVE: usize = 512;

/// Upper bound on sampling temperature while safe mode is active.
pub const SAFE_MODE_TEMPERATURE_CAP: f32 = 0.4;

/// Tool-call ceiling forced while safe mode is active.
pub const SAFE_MODE_MAX_TOOL_CALLS: u32 = 1;

/// Capability answering "is safe mode active for this call?".
pub trait SafeMode: Send + Sync {
    fn is_active(&self) -> bool;
}

/// Plain booleans act as providers, which keeps tests terse: `&true`.
impl SafeMode for bool {
    fn is_active(&self) -> bool {
        *self
    }
}

/// Fixed-state provider, typically built from a config snapshot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StaticSafeMode {
    active: bool,
}

impl StaticSafeMode {
    pub const fn new(active: bool) -> Self {
        Self { active }
    }

    pub const fn enabled() -> Self {
        Self::new(true)
    }

    pub const fn disabled() -> Self {
        Self::new(false)
    }
}

impl SafeMode for StaticSafeMode {
    fn is_active(&self) -> bool {
        self.active
    }
}
