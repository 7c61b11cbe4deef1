//! Domain models for the settlement core.

/// Declares a UUID-backed identifier newtype with the usual conversions.
macro_rules! uuid_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(
            Debug,
            Clone,
            Copy,
            PartialEq,
            Eq,
            Hash,
            PartialOrd,
            Ord,
            serde::Serialize,
            serde::Deserialize,
            utoipa::ToSchema,
        )]
        #[serde(transparent)]
        pub struct $name(uuid::Uuid);

        impl $name {
            /// Creates a new random identifier.
            pub fn new() -> Self {
                Self(uuid::Uuid::new_v4())
            }

            /// Creates an identifier from an existing UUID.
            pub fn from_uuid(uuid: uuid::Uuid) -> Self {
                Self(uuid)
            }

            /// Returns the underlying UUID.
            pub fn as_uuid(&self) -> &uuid::Uuid {
                &self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl std::str::FromStr for $name {
            type Err = uuid::Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Ok(Self(uuid::Uuid::parse_str(s)?))
            }
        }
    };
}

pub mod fund;
pub mod idempotency;
pub mod money;
pub mod payment;
pub mod reconciliation;
pub mod transaction;

pub use fund::{AggregatedFunds, FundId, FundPosition, FundView, SourceStatus};
pub use idempotency::IdempotentOutcome;
pub use money::{Currency, Money};
pub use payment::{BatchId, Payment, PaymentId, PaymentState};
pub use reconciliation::{
    AmbiguousMatch, AmountMismatch, MatchMethod, MatchedPair, ReconciliationId,
    ReconciliationRecord, ReconciliationScope, StateMismatch,
};
pub use transaction::{AccountId, Transaction, TransactionId, TransactionState};
