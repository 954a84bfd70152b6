/*
 * Copyright (C) 2026 Mark Wells Dev
 *
 * This program is free software: you can redistribute it and/or modify
 * it under the terms of the GNU General Public License as published by
 * the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * This program is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 * GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License
 * along with this program.  If not, see <https://www.gnu.org/licenses/>.
 */

//! Client lifecycle state.

use std::fmt;

/// Lifecycle of one [`LspClient`](super::LspClient).
///
/// `Created → Initializing → Ready → ShuttingDown → Terminated`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
    /// Process spawned, `initialize` not sent yet.
    Created,
    /// `initialize` sent, response pending.
    Initializing,
    /// `initialize` answered.
    Ready,
    /// `shutdown` sent.
    ShuttingDown,
    /// Process released; every operation fails with `Closed`.
    Terminated,
}

impl ClientState {
    /// Create from atomic u8 value.
    #[must_use]
    pub const fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Created,
            1 => Self::Initializing,
            2 => Self::Ready,
            3 => Self::ShuttingDown,
            _ => Self::Terminated,
        }
    }

    /// Convert to atomic u8 value.
    #[must_use]
    pub const fn as_u8(self) -> u8 {
        match self {
            Self::Created => 0,
            Self::Initializing => 1,
            Self::Ready => 2,
            Self::ShuttingDown => 3,
            Self::Terminated => 4,
        }
    }

    /// Whether the client still accepts operations.
    #[must_use]
    pub const fn is_open(self) -> bool {
        matches!(self, Self::Created | Self::Initializing | Self::Ready)
    }
}

impl fmt::Display for ClientState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Created => "created",
            Self::Initializing => "initializing",
            Self::Ready => "ready",
            Self::ShuttingDown => "shutting-down",
            Self::Terminated => "terminated",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_state_conversion() {
        for state in [
            ClientState::Created,
            ClientState::Initializing,
            ClientState::Ready,
            ClientState::ShuttingDown,
            ClientState::Terminated,
        ] {
            assert_eq!(ClientState::from_u8(state.as_u8()), state);
        }
        assert_eq!(ClientState::from_u8(99), ClientState::Terminated);
    }

    #[test]
    fn test_is_open() {
        assert!(ClientState::Created.is_open());
        assert!(ClientState::Ready.is_open());
        assert!(!ClientState::ShuttingDown.is_open());
        assert!(!ClientState::Terminated.is_open());
    }
}
