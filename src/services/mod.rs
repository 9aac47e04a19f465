pub mod payments;
pub mod reconciliation;
pub mod settlement;
pub mod threeds;

pub use payments::{
    DirectChargeInput, HostedCharge, HostedChargeInput, PaymentService, ServiceConfig,
    WebhookOutcome,
};
pub use reconciliation::{run_reconciliation, ReconcileSummary, Reconciler};
pub use settlement::{run_settlement_scheduler, SettlementAggregator};
pub use threeds::ThreeDsCoordinator;

/// Bounded retries for writes racing webhooks or reconciliation.
pub(crate) const MAX_WRITE_ATTEMPTS: u32 = 3;
