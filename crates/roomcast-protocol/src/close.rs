//! Close codes and the session lifecycle states.

/// WebSocket close codes used by the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseCode {
    /// 1000: normal closure. Also used for handler faults and shutdown.
    Normal,
    /// 1001: endpoint going away.
    Away,
    /// 1011: unexpected server condition.
    Error,
    Custom(u16),
}

impl CloseCode {
    pub fn code(&self) -> u16 {
        match self {
            Self::Normal => 1000,
            Self::Away => 1001,
            Self::Error => 1011,
            Self::Custom(c) => *c,
        }
    }

    pub fn from_code(code: u16) -> Self {
        match code {
            1000 => Self::Normal,
            1001 => Self::Away,
            1011 => Self::Error,
            c => Self::Custom(c),
        }
    }
}

/// Lifecycle of a session, mirroring the socket handshake/close states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SessionState {
    Connecting = 0,
    Open = 1,
    Closing = 2,
    Closed = 3,
}

impl SessionState {
    pub fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Connecting,
            1 => Self::Open,
            2 => Self::Closing,
            _ => Self::Closed,
        }
    }

    pub fn is_open(&self) -> bool {
        *self == Self::Open
    }
}
