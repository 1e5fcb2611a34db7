/// Execution state of a CPU device, as seen by the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub enum CpuRunState {
    /// Reset pending or held; the reset sequence runs once released.
    #[default]
    Reset,
    /// Fetching and executing instructions.
    Running,
    /// Stopped by a halt instruction until the next reset.
    Halted,
    /// Idle until an interrupt request arrives.
    WaitingForInterrupt,
}

impl CpuRunState {
    /// Returns `true` if the CPU burns its slices without fetching.
    #[must_use]
    pub const fn is_idle(self) -> bool {
        matches!(self, Self::Halted | Self::WaitingForInterrupt)
    }

    pub(crate) const fn as_u8(self) -> u8 {
        match self {
            Self::Reset => 0,
            Self::Running => 1,
            Self::Halted => 2,
            Self::WaitingForInterrupt => 3,
        }
    }

    pub(crate) const fn from_u8(raw: u8) -> Option<Self> {
        match raw {
            0 => Some(Self::Reset),
            1 => Some(Self::Running),
            2 => Some(Self::Halted),
            3 => Some(Self::WaitingForInterrupt),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::CpuRunState;

    #[test]
    fn run_state_default_is_reset() {
        assert_eq!(CpuRunState::default(), CpuRunState::Reset);
    }

    #[test]
    fn only_halt_and_wait_are_idle() {
        assert!(!CpuRunState::Reset.is_idle());
        assert!(!CpuRunState::Running.is_idle());
        assert!(CpuRunState::Halted.is_idle());
        assert!(CpuRunState::WaitingForInterrupt.is_idle());
    }

    #[test]
    fn saved_codes_round_trip() {
        for state in [
            CpuRunState::Reset,
            CpuRunState::Running,
            CpuRunState::Halted,
            CpuRunState::WaitingForInterrupt,
        ] {
            assert_eq!(CpuRunState::from_u8(state.as_u8()), Some(state));
        }
        assert_eq!(CpuRunState::from_u8(4), None);
    }
}
