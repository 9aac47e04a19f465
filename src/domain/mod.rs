//! Domain entities for the payment core: transactions, settlement
//! batches, and the supported-currency table. Framework-agnostic; all
//! state machine rules live here.

pub mod currency;
pub mod settlement;
pub mod transaction;

pub use settlement::{InvalidAdvance, Payee, PayeeKind, SettlementBatch, SettlementStatus};
pub use transaction::{
    FraudStatus, NewTransaction, PaymentMethod, ThreeDsStatus, Transaction, TransactionStatus,
};
