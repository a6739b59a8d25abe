//! Transfer and Settlement State Definitions

use std::fmt;

/// Per-attempt protocol state.
///
/// ```text
/// PARSE_REQUEST → VALIDATE → PENDING_CONFIRMATION → SETTLED
///                    ↓                ↓
///                REJECTED          EXPIRED
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransferState {
    ParseRequest,
    Validate,
    PendingConfirmation,
    /// Terminal: credit moved
    Settled,
    /// Terminal: a validation step refused the request
    Rejected,
    /// Terminal: confirmation window elapsed or code unknown
    Expired,
}

impl TransferState {
    #[inline]
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TransferState::Settled | TransferState::Rejected | TransferState::Expired
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TransferState::ParseRequest => "PARSE_REQUEST",
            TransferState::Validate => "VALIDATE",
            TransferState::PendingConfirmation => "PENDING_CONFIRMATION",
            TransferState::Settled => "SETTLED",
            TransferState::Rejected => "REJECTED",
            TransferState::Expired => "EXPIRED",
        }
    }
}

impl fmt::Display for TransferState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Settlement journal states
///
/// State IDs are stored as SMALLINT.
/// Terminal states: APPLIED (20), FAILED (-10)
///
/// ```text
/// RECORDED → DEBITED → APPLIED
///     ↓          ↓
///   FAILED ←─────┘  (debit reversed)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i16)]
pub enum SettlementState {
    /// Record written, no leg applied yet
    Recorded = 0,

    /// Sender debited; credit still owed to the recipient
    Debited = 10,

    /// Terminal: both legs applied
    Applied = 20,

    /// Terminal: debit refused, or reversed after the credit leg found no
    /// recipient. Net movement is zero either way.
    Failed = -10,
}

impl SettlementState {
    #[inline]
    pub fn is_terminal(&self) -> bool {
        matches!(self, SettlementState::Applied | SettlementState::Failed)
    }

    /// Funds have left the sender but not reached the recipient.
    #[inline]
    pub fn is_in_flight(&self) -> bool {
        matches!(self, SettlementState::Debited)
    }

    #[inline]
    pub fn id(&self) -> i16 {
        *self as i16
    }

    pub fn from_id(id: i16) -> Option<Self> {
        match id {
            0 => Some(SettlementState::Recorded),
            10 => Some(SettlementState::Debited),
            20 => Some(SettlementState::Applied),
            -10 => Some(SettlementState::Failed),
            _ => None,
        }
    }

    /// Whether the journal may move from `self` to `next`.
    pub fn can_transition_to(&self, next: SettlementState) -> bool {
        matches!(
            (self, next),
            (SettlementState::Recorded, SettlementState::Debited)
                | (SettlementState::Recorded, SettlementState::Failed)
                | (SettlementState::Debited, SettlementState::Applied)
                | (SettlementState::Debited, SettlementState::Failed)
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SettlementState::Recorded => "RECORDED",
            SettlementState::Debited => "DEBITED",
            SettlementState::Applied => "APPLIED",
            SettlementState::Failed => "FAILED",
        }
    }
}

impl fmt::Display for SettlementState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl TryFrom<i16> for SettlementState {
    type Error = ();

    fn try_from(value: i16) -> Result<Self, Self::Error> {
        SettlementState::from_id(value).ok_or(())
    }
}
