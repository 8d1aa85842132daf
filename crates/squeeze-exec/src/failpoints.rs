//! Chaos/failpoint hooks (feature: `failpoints`).
//!
//! Keep this extremely light: the macro expands to nothing unless the feature
//! is enabled. When enabled, a point panics if its name is listed in
//! `SQUEEZE_FAILPOINTS` (comma separated) and starts with `panic_`.

pub const FAILPOINTS_ENV: &str = "SQUEEZE_FAILPOINTS";

/// Whether `name` is armed in the environment.
pub fn armed(name: &str) -> bool {
    std::env::var(FAILPOINTS_ENV)
        .map(|v| v.split(',').any(|p| p.trim() == name))
        .unwrap_or(false)
}

#[cfg(feature = "failpoints")]
#[macro_export]
macro_rules! fail_point {
    ($name:expr) => {{
        if $name.starts_with("panic_") && $crate::failpoints::armed($name) {
            panic!("failpoint triggered: {}", $name);
        }
    }};
}

#[cfg(not(feature = "failpoints"))]
#[macro_export]
macro_rules! fail_point {
    ($name:expr) => {
        // no-op
        let _ = $name;
    };
}
