pub mod astar;
pub mod config;
pub mod connector_router;
pub mod cost;
pub mod error;
pub mod fallback;
pub mod gate;
pub mod grid;
pub mod obstacles;
pub mod retry;
mod signature;
pub mod telemetry;
pub mod types;

pub use config::{ConfigHandle, RoutingConfig, RoutingMode};
pub use connector_router::{CachedGridSearch, ConnectorRouter, GridQuery, PathSearch, RouteOutcome};
pub use error::{RouteError, SourceError};
pub use fallback::{DirectRouteGenerator, ElbowRoute};
pub use obstacles::{BoundsSource, StaticBounds};
pub use retry::{DeferralState, ManualScheduler, RetryTicket, Scheduler};
pub use telemetry::{ConnectorTelemetry, InMemoryRegistry, ResultRegistry};
pub use types::{ConnectorRequest, GridStatus, ReasonCode, RouteResult};
