//! Data model shared by the discovery server and generators.

pub mod proxy;
pub mod push;
pub mod resource_set;
pub mod types;
pub mod watched;

pub use proxy::Proxy;
pub use push::{
    ConfigKey, Event, ProcessingDone, PushContext, PushRequest, ReasonStats, ResourceDelta,
    TriggerReason,
};
pub use resource_set::{SubscriptionUpdate, WILDCARD, delta_watched_resources};
pub use watched::WatchedResource;
