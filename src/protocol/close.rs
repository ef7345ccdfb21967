//! WebSocket close codes understood by the client

/// Clean shutdown requested by either side
pub const CLOSE_NORMAL: u16 = 1000;

/// Endpoint is going away (server restart, page unload)
pub const CLOSE_GOING_AWAY: u16 = 1001;

/// Connection dropped without a close frame
pub const CLOSE_ABNORMAL: u16 = 1006;

/// Server refuses to serve this session
pub const CLOSE_POLICY_VIOLATION: u16 = 1008;

/// Application close codes the backend uses for credential problems
pub const AUTH_CLOSE_CODES: [u16; 4] = [4001, 4003, 4401, 4403];

/// How a close code should be treated
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseKind {
    /// Intentional teardown, nothing to recover
    Normal,
    /// Never reconnect
    PolicyViolation,
    /// Credential expired or rejected
    Auth,
    /// Anything else; worth another attempt
    Abnormal,
}

impl CloseKind {
    /// Classify a close code
    pub fn from_code(code: u16) -> Self {
        match code {
            CLOSE_NORMAL => CloseKind::Normal,
            CLOSE_POLICY_VIOLATION => CloseKind::PolicyViolation,
            c if AUTH_CLOSE_CODES.contains(&c) => CloseKind::Auth,
            _ => CloseKind::Abnormal,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_close_kind_from_code() {
        assert_eq!(CloseKind::from_code(1000), CloseKind::Normal);
        assert_eq!(CloseKind::from_code(1008), CloseKind::PolicyViolation);
        assert_eq!(CloseKind::from_code(4401), CloseKind::Auth);
        assert_eq!(CloseKind::from_code(1001), CloseKind::Abnormal);
        assert_eq!(CloseKind::from_code(1006), CloseKind::Abnormal);
    }
}
