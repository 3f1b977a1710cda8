use shared::{LeaseEventType, PaymentStatus};
use std::fmt;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeaseTrigger {
    Create,
    ConfirmPayment,
    Cancel,
    Refund,
}

impl LeaseTrigger {
    pub fn verb(&self) -> &'static str {
        match self {
            LeaseTrigger::Create => "create",
            LeaseTrigger::ConfirmPayment => "pay",
            LeaseTrigger::Cancel => "cancel",
            LeaseTrigger::Refund => "refund",
        }
    }
}

impl fmt::Display for LeaseTrigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.verb())
    }
}

/// What a transition does to the leased car.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AvailabilityEffect {
    Claim,
    Release,
    Unchanged,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub from: Option<PaymentStatus>,
    pub to: PaymentStatus,
    pub effect: AvailabilityEffect,
    pub event: LeaseEventType,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("cannot {trigger} a lease in state {}", .from.map(|s| s.as_str()).unwrap_or("none"))]
pub struct TransitionError {
    pub from: Option<PaymentStatus>,
    pub trigger: LeaseTrigger,
}

/// Valid payment-status transitions and the availability effect each one carries.
///
/// ```text
/// (none)  --create--------> pending    claim
/// pending --pay-----------> paid       -
/// pending --cancel--------> cancelled  release
/// paid    --refund--------> refunded   release (or - when cars stay held on refund)
/// ```
#[derive(Debug, Clone, Copy)]
pub struct LeaseStateMachine {
    release_car_on_refund: bool,
}

impl Default for LeaseStateMachine {
    fn default() -> Self {
        Self {
            release_car_on_refund: true,
        }
    }
}

impl LeaseStateMachine {
    pub fn new(release_car_on_refund: bool) -> Self {
        Self {
            release_car_on_refund,
        }
    }

    pub fn transition(
        &self,
        from: Option<PaymentStatus>,
        trigger: LeaseTrigger,
    ) -> Result<Transition, TransitionError> {
        use AvailabilityEffect::*;
        use PaymentStatus::*;

        let (to, effect, event) = match (from, trigger) {
            (Some(status), _) if status.is_terminal() => {
                return Err(TransitionError { from, trigger })
            }
            (None, LeaseTrigger::Create) => (Pending, Claim, LeaseEventType::LeaseCreated),
            (Some(Pending), LeaseTrigger::ConfirmPayment) => {
                (Paid, Unchanged, LeaseEventType::LeasePaid)
            }
            (Some(Pending), LeaseTrigger::Cancel) => {
                (Cancelled, Release, LeaseEventType::LeaseCancelled)
            }
            (Some(Paid), LeaseTrigger::Refund) => {
                let effect = if self.release_car_on_refund {
                    Release
                } else {
                    Unchanged
                };
                (Refunded, effect, LeaseEventType::LeaseRefunded)
            }
            _ => return Err(TransitionError { from, trigger }),
        };

        Ok(Transition {
            from,
            to,
            effect,
            event,
        })
    }
}
