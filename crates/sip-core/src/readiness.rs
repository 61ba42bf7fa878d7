//! # Readiness Machine
//!
//! Combines remote availability and device identity into one sync phase.
//!
//! ## State Diagram
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Readiness Lifecycle                              │
//! │                                                                         │
//! │                 availability = Available                                │
//! │  ┌──────────┐   (identity unknown)        ┌─────────────────┐           │
//! │  │ NotReady │────────────────────────────►│ AwaitingAccount │           │
//! │  └────┬─────┘                             └────────┬────────┘           │
//! │       │ availability = Available                   │ identity set       │
//! │       │ (identity known)                           │                    │
//! │       │      ┌─────────────────────────────────────┘                    │
//! │       ▼      ▼     effect: CreatePartition                              │
//! │  ┌──────────────────┐  create ok   ┌─────────┐                          │
//! │  │ PartitionPending │─────────────►│  Ready  │                          │
//! │  └──────────────────┘              └─────────┘                          │
//! │       ▲      │ create failed: stay     │                                │
//! │       └──────┘                         │ different identity             │
//! │       ▲                                │                                │
//! │       └────────────────────────────────┘                                │
//! │                                                                         │
//! │  Any state ── Unavailable / Restricted ──► NotReady (+ PromptSignIn     │
//! │                                             once per entry into class)  │
//! │  Any state ── Unknown / Indeterminate ───► NotReady                     │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The machine performs no I/O. Callers apply an event, then carry out the
//! returned [`ReadinessEffect`]s (create the partition, prompt the user).
//! Both entry edges converge on `PartitionPending` regardless of order.

use serde::{Deserialize, Serialize};

use crate::types::{AvailabilityState, DeviceIdentity, PartitionId, DEFAULT_ZONE_SUFFIX};

// =============================================================================
// Phase
// =============================================================================

/// Combined availability × partition phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncPhase {
    #[default]
    NotReady,
    AwaitingAccount,
    PartitionPending,
    Ready,
}

impl SyncPhase {
    /// Push and pull are only permitted from `Ready`.
    pub fn permits_sync(&self) -> bool {
        matches!(self, SyncPhase::Ready)
    }
}

impl std::fmt::Display for SyncPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SyncPhase::NotReady => write!(f, "not_ready"),
            SyncPhase::AwaitingAccount => write!(f, "awaiting_account"),
            SyncPhase::PartitionPending => write!(f, "partition_pending"),
            SyncPhase::Ready => write!(f, "ready"),
        }
    }
}

// =============================================================================
// Events & Effects
// =============================================================================

/// Inputs to the readiness machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadinessEvent {
    /// The availability tracker observed a new account state.
    AvailabilityChanged(AvailabilityState),
    /// The application learned (or changed) the device identity.
    DeviceIdentitySet(DeviceIdentity),
    /// The remote store confirmed the partition exists.
    PartitionCreated(PartitionId),
    /// Partition creation failed; wait for the next entry edge.
    PartitionCreationFailed(PartitionId),
}

/// Side effects the caller must carry out after a transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadinessEffect {
    /// Issue a create-zone request for this partition.
    CreatePartition(PartitionId),
    /// Ask the user to sign in to their account.
    PromptSignIn,
    /// The machine just entered `Ready` for this partition.
    EnteredReady(PartitionId),
}

/// Result of applying one event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    pub from: SyncPhase,
    pub to: SyncPhase,
    pub effects: Vec<ReadinessEffect>,
}

impl Transition {
    /// Returns true if the phase changed.
    pub fn changed(&self) -> bool {
        self.from != self.to
    }
}

// =============================================================================
// Machine
// =============================================================================

/// Pure readiness state machine.
#[derive(Debug, Clone)]
pub struct ReadinessMachine {
    phase: SyncPhase,
    availability: AvailabilityState,
    identity: Option<DeviceIdentity>,
    zone_suffix: String,
}

impl Default for ReadinessMachine {
    fn default() -> Self {
        Self::new(DEFAULT_ZONE_SUFFIX)
    }
}

impl ReadinessMachine {
    /// Creates a machine in `NotReady` with the given zone suffix.
    pub fn new(zone_suffix: impl Into<String>) -> Self {
        ReadinessMachine {
            phase: SyncPhase::NotReady,
            availability: AvailabilityState::Unknown,
            identity: None,
            zone_suffix: zone_suffix.into(),
        }
    }

    pub fn phase(&self) -> SyncPhase {
        self.phase
    }

    pub fn availability(&self) -> AvailabilityState {
        self.availability
    }

    pub fn identity(&self) -> Option<&DeviceIdentity> {
        self.identity.as_ref()
    }

    /// Partition for the current identity, if one is known.
    pub fn partition(&self) -> Option<PartitionId> {
        self.identity
            .as_ref()
            .map(|id| PartitionId::for_device(id, &self.zone_suffix))
    }

    /// Applies an event and returns the transition with its effects.
    pub fn apply(&mut self, event: ReadinessEvent) -> Transition {
        let from = self.phase;
        let mut effects = Vec::new();

        match event {
            ReadinessEvent::AvailabilityChanged(state) => {
                let previous = self.availability;
                self.availability = state;
                self.on_availability(previous, state, &mut effects);
            }
            ReadinessEvent::DeviceIdentitySet(identity) => {
                self.on_identity(identity, &mut effects);
            }
            ReadinessEvent::PartitionCreated(partition) => {
                if self.phase == SyncPhase::PartitionPending
                    && self.partition().as_ref() == Some(&partition)
                {
                    self.phase = SyncPhase::Ready;
                    effects.push(ReadinessEffect::EnteredReady(partition));
                }
            }
            ReadinessEvent::PartitionCreationFailed(_) => {
                // Stays pending; the next entry edge re-issues creation.
            }
        }

        Transition {
            from,
            to: self.phase,
            effects,
        }
    }

    fn on_availability(
        &mut self,
        previous: AvailabilityState,
        state: AvailabilityState,
        effects: &mut Vec<ReadinessEffect>,
    ) {
        match state {
            AvailabilityState::Available => match self.phase {
                SyncPhase::NotReady => match self.partition() {
                    Some(partition) => {
                        self.phase = SyncPhase::PartitionPending;
                        effects.push(ReadinessEffect::CreatePartition(partition));
                    }
                    None => self.phase = SyncPhase::AwaitingAccount,
                },
                SyncPhase::PartitionPending => {
                    if let Some(partition) = self.partition() {
                        effects.push(ReadinessEffect::CreatePartition(partition));
                    }
                }
                SyncPhase::AwaitingAccount | SyncPhase::Ready => {}
            },
            AvailabilityState::Unavailable | AvailabilityState::Restricted => {
                self.phase = SyncPhase::NotReady;
                if !previous.requires_sign_in() {
                    effects.push(ReadinessEffect::PromptSignIn);
                }
            }
            AvailabilityState::Unknown | AvailabilityState::Indeterminate => {
                self.phase = SyncPhase::NotReady;
            }
        }
    }

    fn on_identity(&mut self, identity: DeviceIdentity, effects: &mut Vec<ReadinessEffect>) {
        let same = self.identity.as_ref() == Some(&identity);
        self.identity = Some(identity);

        let Some(partition) = self.partition() else {
            return;
        };

        match self.phase {
            SyncPhase::NotReady => {}
            SyncPhase::AwaitingAccount | SyncPhase::PartitionPending => {
                self.phase = SyncPhase::PartitionPending;
                effects.push(ReadinessEffect::CreatePartition(partition));
            }
            SyncPhase::Ready => {
                if !same {
                    self.phase = SyncPhase::PartitionPending;
                    effects.push(ReadinessEffect::CreatePartition(partition));
                }
            }
        }
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn device(name: &str) -> DeviceIdentity {
        DeviceIdentity::new(name).unwrap()
    }

    fn zone(name: &str) -> PartitionId {
        PartitionId::for_device(&device(name), DEFAULT_ZONE_SUFFIX)
    }

    #[test]
    fn test_available_then_identity() {
        let mut m = ReadinessMachine::default();

        let t = m.apply(ReadinessEvent::AvailabilityChanged(AvailabilityState::Available));
        assert_eq!(t.to, SyncPhase::AwaitingAccount);
        assert!(t.effects.is_empty());

        let t = m.apply(ReadinessEvent::DeviceIdentitySet(device("iPhone")));
        assert_eq!(t.to, SyncPhase::PartitionPending);
        assert_eq!(t.effects, vec![ReadinessEffect::CreatePartition(zone("iPhone"))]);

        let t = m.apply(ReadinessEvent::PartitionCreated(zone("iPhone")));
        assert_eq!(t.to, SyncPhase::Ready);
        assert_eq!(t.effects, vec![ReadinessEffect::EnteredReady(zone("iPhone"))]);
    }

    #[test]
    fn test_identity_then_available() {
        let mut m = ReadinessMachine::default();

        let t = m.apply(ReadinessEvent::DeviceIdentitySet(device("iPhone")));
        assert_eq!(t.to, SyncPhase::NotReady);
        assert!(t.effects.is_empty());

        let t = m.apply(ReadinessEvent::AvailabilityChanged(AvailabilityState::Available));
        assert_eq!(t.to, SyncPhase::PartitionPending);
        assert_eq!(t.effects, vec![ReadinessEffect::CreatePartition(zone("iPhone"))]);

        m.apply(ReadinessEvent::PartitionCreated(zone("iPhone")));
        assert_eq!(m.phase(), SyncPhase::Ready);
    }

    #[test]
    fn test_creation_failure_stays_pending_and_retries_on_next_edge() {
        let mut m = ReadinessMachine::default();
        m.apply(ReadinessEvent::DeviceIdentitySet(device("iPhone")));
        m.apply(ReadinessEvent::AvailabilityChanged(AvailabilityState::Available));

        let t = m.apply(ReadinessEvent::PartitionCreationFailed(zone("iPhone")));
        assert_eq!(t.to, SyncPhase::PartitionPending);
        assert!(t.effects.is_empty());

        let t = m.apply(ReadinessEvent::AvailabilityChanged(AvailabilityState::Available));
        assert_eq!(t.effects, vec![ReadinessEffect::CreatePartition(zone("iPhone"))]);
    }

    #[test]
    fn test_unavailable_prompts_once_per_entry() {
        let mut m = ReadinessMachine::default();

        let t = m.apply(ReadinessEvent::AvailabilityChanged(AvailabilityState::Unavailable));
        assert_eq!(t.to, SyncPhase::NotReady);
        assert_eq!(t.effects, vec![ReadinessEffect::PromptSignIn]);

        let t = m.apply(ReadinessEvent::AvailabilityChanged(AvailabilityState::Restricted));
        assert!(t.effects.is_empty());

        m.apply(ReadinessEvent::AvailabilityChanged(AvailabilityState::Available));
        let t = m.apply(ReadinessEvent::AvailabilityChanged(AvailabilityState::Unavailable));
        assert_eq!(t.effects, vec![ReadinessEffect::PromptSignIn]);
    }

    #[test]
    fn test_indeterminate_drops_to_not_ready_without_prompt() {
        let mut m = ReadinessMachine::default();
        m.apply(ReadinessEvent::DeviceIdentitySet(device("iPhone")));
        m.apply(ReadinessEvent::AvailabilityChanged(AvailabilityState::Available));
        m.apply(ReadinessEvent::PartitionCreated(zone("iPhone")));

        let t = m.apply(ReadinessEvent::AvailabilityChanged(AvailabilityState::Indeterminate));
        assert_eq!(t.from, SyncPhase::Ready);
        assert_eq!(t.to, SyncPhase::NotReady);
        assert!(t.effects.is_empty());
    }

    #[test]
    fn test_new_identity_while_ready_recreates_partition() {
        let mut m = ReadinessMachine::default();
        m.apply(ReadinessEvent::DeviceIdentitySet(device("iPhone")));
        m.apply(ReadinessEvent::AvailabilityChanged(AvailabilityState::Available));
        m.apply(ReadinessEvent::PartitionCreated(zone("iPhone")));

        let t = m.apply(ReadinessEvent::DeviceIdentitySet(device("iPhone")));
        assert!(!t.changed());
        assert!(t.effects.is_empty());

        let t = m.apply(ReadinessEvent::DeviceIdentitySet(device("iPad")));
        assert_eq!(t.to, SyncPhase::PartitionPending);
        assert_eq!(t.effects, vec![ReadinessEffect::CreatePartition(zone("iPad"))]);
    }

    #[test]
    fn test_stale_creation_is_ignored() {
        let mut m = ReadinessMachine::default();
        m.apply(ReadinessEvent::DeviceIdentitySet(device("iPhone")));
        m.apply(ReadinessEvent::AvailabilityChanged(AvailabilityState::Available));
        m.apply(ReadinessEvent::DeviceIdentitySet(device("iPad")));

        let t = m.apply(ReadinessEvent::PartitionCreated(zone("iPhone")));
        assert_eq!(t.to, SyncPhase::PartitionPending);
        assert!(t.effects.is_empty());
    }
}
