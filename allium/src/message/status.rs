// Copyright (c) 2024 Botho Foundation

use std::fmt;

/// Delivery outcome reported to the sending client.
///
/// The numeric codes are part of the client protocol.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageStatus {
    Accepted = 1,
    BestEffortSuccess = 2,
    BestEffortFailure = 3,
    GuaranteedSuccess = 4,
    GuaranteedFailure = 5,
    Expired = 14,
    NoLocalTunnels = 16,
    UnsupportedEncryption = 17,
    BadLeaseSet = 19,
    NoLeaseSet = 21,
}

impl MessageStatus {
    pub fn code(self) -> u8 {
        self as u8
    }

    pub fn is_success(self) -> bool {
        matches!(
            self,
            MessageStatus::Accepted | MessageStatus::BestEffortSuccess | MessageStatus::GuaranteedSuccess
        )
    }
}

impl fmt::Display for MessageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}({})", self, self.code())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes() {
        assert_eq!(MessageStatus::GuaranteedSuccess.code(), 4);
        assert_eq!(MessageStatus::NoLeaseSet.code(), 21);
        assert!(MessageStatus::BestEffortSuccess.is_success());
        assert!(!MessageStatus::Expired.is_success());
        assert_eq!(MessageStatus::NoLocalTunnels.to_string(), "NoLocalTunnels(16)");
    }
}
