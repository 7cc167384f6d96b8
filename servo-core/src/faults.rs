//! Fault taxonomy and the accumulating fault set.
//!
//! Faults are latched: once raised they stay in the set until an operator
//! clears them explicitly. Nothing in the controller clears a fault on its own.

use core::fmt;

/// Individual fault conditions tracked by the controller.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Fault {
    /// Motor current exceeded the configured limit.
    Overcurrent,
    /// Sustained tracking error, or homing failed to find its stops.
    PositionError,
    /// Hall sensors reported an invalid sector while driving.
    SensorFault,
    /// Failsafe forcibly handed throttle authority back to the conventional ETB.
    CommunicationError,
}

impl Fault {
    /// Every fault in bit order.
    pub const ALL: [Fault; 4] = [
        Fault::Overcurrent,
        Fault::PositionError,
        Fault::SensorFault,
        Fault::CommunicationError,
    ];

    /// Bit used for this fault in [`FaultSet::bits`].
    #[must_use]
    pub const fn bit(self) -> u8 {
        match self {
            Fault::Overcurrent => 1 << 0,
            Fault::PositionError => 1 << 1,
            Fault::SensorFault => 1 << 2,
            Fault::CommunicationError => 1 << 3,
        }
    }

    /// Short lowercase label used by the console.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Fault::Overcurrent => "overcurrent",
            Fault::PositionError => "position-error",
            Fault::SensorFault => "sensor",
            Fault::CommunicationError => "communication",
        }
    }

    /// Returns `true` for faults that force the controller into the fault state.
    #[must_use]
    pub const fn is_critical(self) -> bool {
        matches!(
            self,
            Fault::Overcurrent | Fault::PositionError | Fault::SensorFault
        )
    }
}

impl fmt::Display for Fault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Accumulating set of raised faults.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct FaultSet(u8);

impl FaultSet {
    const MASK: u8 = 0b1111;

    /// Creates an empty set.
    #[must_use]
    pub const fn new() -> Self {
        Self(0)
    }

    /// Rebuilds a set from its bitmask, ignoring unknown bits.
    #[must_use]
    pub const fn from_bits(bits: u8) -> Self {
        Self(bits & Self::MASK)
    }

    /// Returns the raw bitmask published through telemetry.
    #[must_use]
    pub const fn bits(self) -> u8 {
        self.0
    }

    /// Adds a fault and reports whether it was newly raised.
    pub fn insert(&mut self, fault: Fault) -> bool {
        let fresh = !self.contains(fault);
        self.0 |= fault.bit();
        fresh
    }

    #[must_use]
    pub const fn contains(self, fault: Fault) -> bool {
        self.0 & fault.bit() != 0
    }

    #[must_use]
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Returns `true` when any fault that demands the fault state is present.
    #[must_use]
    pub fn has_critical(self) -> bool {
        self.iter().any(Fault::is_critical)
    }

    /// Removes every fault.
    pub fn clear(&mut self) {
        self.0 = 0;
    }

    /// Iterates the contained faults in bit order.
    pub fn iter(self) -> impl Iterator<Item = Fault> {
        Fault::ALL.into_iter().filter(move |fault| self.contains(*fault))
    }
}

impl fmt::Display for FaultSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return f.write_str("none");
        }

        for (index, fault) in self.iter().enumerate() {
            if index > 0 {
                f.write_str(",")?;
            }
            fault.fmt(f)?;
        }
        Ok(())
    }
}
