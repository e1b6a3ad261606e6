//! Obstacle-aware connector routing for diagram renderers.
//!
//! The entry point is [`routing::ConnectorRouter`]: give it a configuration
//! handle, a bounds source and a retry scheduler, then call
//! [`routing::ConnectorRouter::route`] once per connector and layout pass.

pub mod geometry;
pub mod lib_tracing;
pub mod routing;

#[cfg(feature = "python")]
mod python;

pub use geometry::{AnchorRule, AxisOrder, Point, RawBox, Rect};
pub use routing::{ConfigHandle, ConnectorRequest, ConnectorRouter, RouteResult, RoutingConfig, RoutingMode};
