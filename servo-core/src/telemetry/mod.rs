//! Telemetry published by the servo controller.
//!
//! Two surfaces are provided. [`TelemetrySnapshot`] is the fixed record
//! refreshed on every tick for supervisors and dashboards. [`TelemetryRecorder`]
//! keeps a bounded history of discrete events (state changes, faults, ETB
//! handoffs) whose kinds encode to compact numeric codes for transport over
//! diagnostics channels.

use core::{fmt, time::Duration};

use heapless::{HistoryBuf, OldestOrdered};

use crate::controller::OperatingState;
use crate::faults::Fault;
use crate::homing::{HomingState, TravelLimits};
use crate::timing::ControlInstant;

/// Identifier assigned to each recorded event.
pub type EventId = u32;

/// Total number of events retained in memory.
pub const TELEMETRY_RING_CAPACITY: usize = 64;

/// Per-tick record of the controller's internal state.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct TelemetrySnapshot {
    pub state: OperatingState,
    pub homing: HomingState,
    pub position: f32,
    pub position_valid: bool,
    /// Generic servo target, in percent.
    pub target: f32,
    /// ETB-mode throttle target, in percent.
    pub throttle_target: f32,
    pub motor_current: f32,
    pub peak_current: f32,
    pub hall_state: u8,
    pub hall_transitions: u32,
    pub encoder: i32,
    pub fault_bits: u8,
    pub pid_output: f32,
    pub driver_enabled: bool,
    pub etb_mode: bool,
    pub failsafe_active: bool,
    pub failsafe_count: u16,
    /// Throttle target minus position while ETB mode is on, zero otherwise.
    pub throttle_error: f32,
    pub tick_count: u32,
}

impl TelemetrySnapshot {
    /// Snapshot of a freshly constructed, disabled controller.
    #[must_use]
    pub const fn initial() -> Self {
        Self {
            state: OperatingState::Disabled,
            homing: HomingState::Inactive,
            position: 0.0,
            position_valid: false,
            target: 0.0,
            throttle_target: 0.0,
            motor_current: 0.0,
            peak_current: 0.0,
            hall_state: 0,
            hall_transitions: 0,
            encoder: 0,
            fault_bits: 0,
            pid_output: 0.0,
            driver_enabled: false,
            etb_mode: false,
            failsafe_active: false,
            failsafe_count: 0,
            throttle_error: 0.0,
            tick_count: 0,
        }
    }

    /// Returns `true` when the servo, not the conventional ETB, owns the throttle.
    #[must_use]
    pub const fn servo_has_authority(&self) -> bool {
        self.etb_mode && !self.failsafe_active
    }
}

impl Default for TelemetrySnapshot {
    fn default() -> Self {
        Self::initial()
    }
}

/// Discrete events recorded by the controller.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum TelemetryEventKind {
    StateEntered(OperatingState),
    FaultRaised(Fault),
    FaultsCleared,
    EtbEngaged,
    EtbReleased,
    FailsafeEngaged,
    FailsafeRecovered,
    HomingComplete,
    HomingFailed,
    ConfigurationRejected,
    Custom(u16),
}

impl fmt::Display for TelemetryEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TelemetryEventKind::StateEntered(state) => write!(f, "state-entered {state}"),
            TelemetryEventKind::FaultRaised(fault) => write!(f, "fault-raised {fault}"),
            TelemetryEventKind::FaultsCleared => f.write_str("faults-cleared"),
            TelemetryEventKind::EtbEngaged => f.write_str("etb-engaged"),
            TelemetryEventKind::EtbReleased => f.write_str("etb-released"),
            TelemetryEventKind::FailsafeEngaged => f.write_str("failsafe-engaged"),
            TelemetryEventKind::FailsafeRecovered => f.write_str("failsafe-recovered"),
            TelemetryEventKind::HomingComplete => f.write_str("homing-complete"),
            TelemetryEventKind::HomingFailed => f.write_str("homing-failed"),
            TelemetryEventKind::ConfigurationRejected => f.write_str("configuration-rejected"),
            TelemetryEventKind::Custom(code) => write!(f, "custom({code})"),
        }
    }
}

impl TelemetryEventKind {
    const STATE_ENTERED_BASE: u16 = 0x0000;
    const FAULT_RAISED_BASE: u16 = 0x0010;
    const FAULTS_CLEARED_CODE: u16 = 0x0020;
    const ETB_ENGAGED_CODE: u16 = 0x0021;
    const ETB_RELEASED_CODE: u16 = 0x0022;
    const FAILSAFE_ENGAGED_CODE: u16 = 0x0023;
    const FAILSAFE_RECOVERED_CODE: u16 = 0x0024;
    const HOMING_COMPLETE_CODE: u16 = 0x0025;
    const HOMING_FAILED_CODE: u16 = 0x0026;
    const CONFIGURATION_REJECTED_CODE: u16 = 0x0027;

    /// Encodes the event into a compact transport-friendly discriminant.
    #[must_use]
    pub const fn to_raw(self) -> u16 {
        match self {
            TelemetryEventKind::StateEntered(state) => {
                Self::STATE_ENTERED_BASE + state.to_raw() as u16
            }
            TelemetryEventKind::FaultRaised(fault) => Self::FAULT_RAISED_BASE + fault_index(fault),
            TelemetryEventKind::FaultsCleared => Self::FAULTS_CLEARED_CODE,
            TelemetryEventKind::EtbEngaged => Self::ETB_ENGAGED_CODE,
            TelemetryEventKind::EtbReleased => Self::ETB_RELEASED_CODE,
            TelemetryEventKind::FailsafeEngaged => Self::FAILSAFE_ENGAGED_CODE,
            TelemetryEventKind::FailsafeRecovered => Self::FAILSAFE_RECOVERED_CODE,
            TelemetryEventKind::HomingComplete => Self::HOMING_COMPLETE_CODE,
            TelemetryEventKind::HomingFailed => Self::HOMING_FAILED_CODE,
            TelemetryEventKind::ConfigurationRejected => Self::CONFIGURATION_REJECTED_CODE,
            TelemetryEventKind::Custom(code) => code,
        }
    }

    /// Decodes a raw discriminant, falling back to [`TelemetryEventKind::Custom`].
    #[must_use]
    pub fn from_raw(code: u16) -> Self {
        match code {
            Self::FAULTS_CLEARED_CODE => TelemetryEventKind::FaultsCleared,
            Self::ETB_ENGAGED_CODE => TelemetryEventKind::EtbEngaged,
            Self::ETB_RELEASED_CODE => TelemetryEventKind::EtbReleased,
            Self::FAILSAFE_ENGAGED_CODE => TelemetryEventKind::FailsafeEngaged,
            Self::FAILSAFE_RECOVERED_CODE => TelemetryEventKind::FailsafeRecovered,
            Self::HOMING_COMPLETE_CODE => TelemetryEventKind::HomingComplete,
            Self::HOMING_FAILED_CODE => TelemetryEventKind::HomingFailed,
            Self::CONFIGURATION_REJECTED_CODE => TelemetryEventKind::ConfigurationRejected,
            value if (Self::STATE_ENTERED_BASE..Self::FAULT_RAISED_BASE).contains(&value) => {
                u8::try_from(value - Self::STATE_ENTERED_BASE)
                    .ok()
                    .and_then(OperatingState::from_raw)
                    .map_or(TelemetryEventKind::Custom(value), |state| {
                        TelemetryEventKind::StateEntered(state)
                    })
            }
            value if (Self::FAULT_RAISED_BASE..Self::FAULTS_CLEARED_CODE).contains(&value) => {
                usize::try_from(value - Self::FAULT_RAISED_BASE)
                    .ok()
                    .and_then(|index| Fault::ALL.get(index).copied())
                    .map_or(TelemetryEventKind::Custom(value), |fault| {
                        TelemetryEventKind::FaultRaised(fault)
                    })
            }
            other => TelemetryEventKind::Custom(other),
        }
    }
}

const fn fault_index(fault: Fault) -> u16 {
    match fault {
        Fault::Overcurrent => 0,
        Fault::PositionError => 1,
        Fault::SensorFault => 2,
        Fault::CommunicationError => 3,
    }
}

/// Payloads carried alongside telemetry events.
#[derive(Copy, Clone, Debug, PartialEq)]
pub enum TelemetryPayload {
    /// No additional metadata accompanies the event.
    None,
    /// State change details.
    Transition(TransitionTelemetry),
    /// Authority handoff between the servo and the conventional ETB.
    Handoff(HandoffTelemetry),
    /// Travel limits measured by homing.
    Travel(TravelLimits),
}

impl TelemetryPayload {
    /// Convenience constructor when no payload data is needed.
    #[must_use]
    pub const fn none() -> Self {
        TelemetryPayload::None
    }
}

/// State change payload.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct TransitionTelemetry {
    pub from: OperatingState,
    /// Time spent in the previous state, when it is known.
    pub time_in_previous: Option<Duration>,
}

/// ETB handoff payload.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct HandoffTelemetry {
    /// Conventional-ETB position captured at the last synchronization.
    pub anchor: f32,
    pub failsafe_count: u16,
}

impl HandoffTelemetry {
    #[must_use]
    pub const fn new(anchor: f32, failsafe_count: u16) -> Self {
        Self {
            anchor,
            failsafe_count,
        }
    }
}

/// Telemetry record stored in the ring buffer.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct TelemetryRecord<TInstant>
where
    TInstant: Copy,
{
    pub id: EventId,
    pub timestamp: TInstant,
    pub event: TelemetryEventKind,
    pub details: TelemetryPayload,
}

/// Telemetry ring buffer type alias.
pub type TelemetryRing<TInstant, const CAPACITY: usize = TELEMETRY_RING_CAPACITY> =
    HistoryBuf<TelemetryRecord<TInstant>, CAPACITY>;

/// Records telemetry events into a fixed-size ring buffer.
pub struct TelemetryRecorder<TInstant, const CAPACITY: usize = TELEMETRY_RING_CAPACITY>
where
    TInstant: Copy,
{
    ring: TelemetryRing<TInstant, CAPACITY>,
    last_transition_at: Option<TInstant>,
    next_event_id: EventId,
}

impl<TInstant, const CAPACITY: usize> TelemetryRecorder<TInstant, CAPACITY>
where
    TInstant: ControlInstant,
{
    /// Creates a new telemetry recorder with an empty history.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            ring: HistoryBuf::new(),
            last_transition_at: None,
            next_event_id: 0,
        }
    }

    /// Returns an iterator over the recorded telemetry in chronological order.
    pub fn oldest_first(&self) -> OldestOrdered<'_, TelemetryRecord<TInstant>> {
        self.ring.oldest_ordered()
    }

    /// Returns the most recent telemetry record, if available.
    pub fn latest(&self) -> Option<&TelemetryRecord<TInstant>> {
        self.ring.recent()
    }

    /// Returns the number of records currently stored.
    pub fn len(&self) -> usize {
        self.ring.len()
    }

    /// Returns `true` when no telemetry records are stored.
    pub fn is_empty(&self) -> bool {
        self.ring.is_empty()
    }

    /// Records a state change and the time spent in the previous state.
    pub fn record_state_entered(
        &mut self,
        from: OperatingState,
        to: OperatingState,
        timestamp: TInstant,
    ) -> EventId {
        let time_in_previous = self
            .last_transition_at
            .map(|previous| timestamp.saturating_duration_since(previous));
        self.last_transition_at = Some(timestamp);

        self.record(
            TelemetryEventKind::StateEntered(to),
            TelemetryPayload::Transition(TransitionTelemetry {
                from,
                time_in_previous,
            }),
            timestamp,
        )
    }

    /// Records an arbitrary telemetry event with the supplied payload.
    pub fn record(
        &mut self,
        event: TelemetryEventKind,
        payload: TelemetryPayload,
        timestamp: TInstant,
    ) -> EventId {
        let id = self.next_event_id;
        self.next_event_id = self.next_event_id.wrapping_add(1);

        self.ring.write(TelemetryRecord {
            id,
            timestamp,
            event,
            details: payload,
        });

        id
    }
}

impl<TInstant, const CAPACITY: usize> Default for TelemetryRecorder<TInstant, CAPACITY>
where
    TInstant: ControlInstant,
{
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_codes_decode_back() {
        let events = [
            TelemetryEventKind::StateEntered(OperatingState::PositionControl),
            TelemetryEventKind::FaultRaised(Fault::CommunicationError),
            TelemetryEventKind::FaultsCleared,
            TelemetryEventKind::FailsafeEngaged,
            TelemetryEventKind::HomingFailed,
        ];
        for event in events {
            assert_eq!(TelemetryEventKind::from_raw(event.to_raw()), event);
        }
    }

    #[test]
    fn unknown_codes_fall_back_to_custom() {
        assert_eq!(
            TelemetryEventKind::from_raw(0x000F),
            TelemetryEventKind::Custom(0x000F)
        );
        assert_eq!(
            TelemetryEventKind::from_raw(0x0400),
            TelemetryEventKind::Custom(0x0400)
        );
    }

    #[test]
    fn ring_keeps_most_recent_events() {
        let mut recorder: TelemetryRecorder<Duration, 4> = TelemetryRecorder::new();
        for index in 0..6u16 {
            recorder.record(
                TelemetryEventKind::Custom(index),
                TelemetryPayload::none(),
                Duration::from_millis(u64::from(index)),
            );
        }

        assert_eq!(recorder.len(), 4);
        let first = recorder.oldest_first().next().map(|record| record.event);
        assert_eq!(first, Some(TelemetryEventKind::Custom(2)));
        assert_eq!(recorder.latest().map(|record| record.id), Some(5));
    }

    #[test]
    fn transitions_carry_time_in_previous_state() {
        let mut recorder: TelemetryRecorder<Duration> = TelemetryRecorder::new();
        recorder.record_state_entered(
            OperatingState::Disabled,
            OperatingState::Initializing,
            Duration::from_millis(10),
        );
        recorder.record_state_entered(
            OperatingState::Initializing,
            OperatingState::Idle,
            Duration::from_millis(11),
        );

        let details = recorder.latest().map(|record| record.details);
        assert_eq!(
            details,
            Some(TelemetryPayload::Transition(TransitionTelemetry {
                from: OperatingState::Initializing,
                time_in_previous: Some(Duration::from_millis(1)),
            }))
        );
    }
}
