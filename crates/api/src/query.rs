//! Shared query parameter types for API handlers.

use serde::Deserialize;

/// Default page size for list endpoints.
pub const DEFAULT_LIMIT: i64 = 50;

/// Largest page size a caller may request.
pub const MAX_LIMIT: i64 = 100;

/// `?limit=` for list endpoints.
#[derive(Debug, Default, Deserialize)]
pub struct LimitParams {
    pub limit: Option<i64>,
}

impl LimitParams {
    /// Requested limit clamped to `1..=MAX_LIMIT`.
    pub fn resolved(&self) -> i64 {
        self.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn limit_defaults_and_clamps() {
        assert_eq!(LimitParams::default().resolved(), 50);
        assert_eq!(LimitParams { limit: Some(500) }.resolved(), 100);
        assert_eq!(LimitParams { limit: Some(0) }.resolved(), 1);
        assert_eq!(LimitParams { limit: Some(7) }.resolved(), 7);
    }
}
