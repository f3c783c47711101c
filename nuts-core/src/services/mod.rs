//! Service layer - business logic orchestration
//!
//! Services coordinate domain logic and port interactions. Each service
//! focuses on a specific use case or feature area.

mod balance;
mod category;
pub mod connection;
pub mod logging;
pub mod migration;
mod queue;
mod registry;
mod sync;

pub use balance::{reconstruct, trend_percent, BalanceService};
pub use category::CategoryResolver;
pub use connection::{ConnectionService, LinkRequest};
pub use logging::{now_ms, EntryPoint, LogEntry, LogEvent, LoggingService};
pub use migration::{MigrationResult, MigrationService};
pub use queue::{JobOutcome, LocalSyncQueue};
pub use registry::{known_providers, ProviderRegistry};
pub use sync::{CancellationToken, SyncService};
