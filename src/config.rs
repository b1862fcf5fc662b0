//! # Bus configuration.
//!
//! Provides [`Config`], the settings a [`Bus`](crate::Bus) is created with.
//!
//! ## Sentinel values
//! - `error_capacity = 0` → clamped to 1 (a broadcast channel needs at least one slot)

use std::borrow::Cow;

/// Configuration for a [`Bus`](crate::Bus).
///
/// ## Field semantics
/// - `name`: Label attached to every log record emitted by the bus
/// - `error_capacity`: Ring buffer size of the error stream (min 1; clamped)
///
/// ## Notes
/// All fields are public for flexibility. Prefer the helper accessors to avoid
/// sprinkling sentinel checks across the codebase.
#[derive(Clone, Debug)]
pub struct Config {
    /// Name of the bus, used in log fields.
    pub name: Cow<'static, str>,

    /// Capacity of the error stream broadcast ring buffer.
    ///
    /// Error receivers that lag behind more than `error_capacity` errors will
    /// receive `Lagged` and skip older items.
    pub error_capacity: usize,
}

impl Config {
    /// Creates a default configuration with the given bus name.
    pub fn named(name: impl Into<Cow<'static, str>>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Returns the error stream capacity clamped to a minimum of 1.
    #[inline]
    pub fn error_capacity_clamped(&self) -> usize {
        self.error_capacity.max(1)
    }
}

impl Default for Config {
    /// Default configuration:
    ///
    /// - `name = "bus"`
    /// - `error_capacity = 1024` (good baseline)
    fn default() -> Self {
        Self {
            name: Cow::Borrowed("bus"),
            error_capacity: 1024,
        }
    }
}
