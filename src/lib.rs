//! # topicflow
//!
//! Reactive topic bookkeeping on top of a publish/subscribe bus.
//!
//! Raw readings arrive from the bus and are kept with a bounded history.
//! Derived topics combine one or more source topics through a calculator and
//! publish their result back onto the bus, where it re-enters as an ordinary
//! message and can feed further derived topics.
//!
//! ## Flow
//!
//! ```text
//! Bus message
//!     ↓
//! RawTopicRegistry::ingest()
//!     ↓  (listeners, registration order)
//! SourceBinding::set_value()
//!     ↓
//! DerivedTopic::recompute() → Calculator::calculate()
//!     ↓
//! Bus::publish(derived topic) → back to the top
//! ```
//!
//! ## Module Organization
//!
//! - `topics` - raw registry, exclude list, source bindings, derived topics
//! - `calculators` - calculator trait, catalog and built-in variants
//! - `psychrometrics` - moist air formulas used by the calculators
//! - `bus` - bus trait with in-process and MQTT implementations
//! - `store` - time-series store trait with SQLite and InfluxDB backends
//! - `definitions` - JSON document persistence for declarations
//! - `engine` - ties registries, bus and store together
//! - `ingestion` / `scheduler` - long-running tasks
//! - `config` - runtime configuration from environment variables

pub mod bus;
pub mod calculators;
pub mod config;
pub mod definitions;
pub mod engine;
pub mod ingestion;
pub mod psychrometrics;
pub mod scheduler;
pub mod store;
pub mod topics;

pub use bus::{Bus, BusMessage, LocalBus};
pub use config::RuntimeConfig;
pub use definitions::{DefinitionStorage, FileDefinitionStorage, MemoryDefinitionStorage};
pub use engine::TopicEngine;
pub use store::{Store, StorePoint};
pub use topics::{
    DerivedTopicDeclaration, DerivedTopicRegistry, ExcludeList, RawTopicRegistry, SourceSpec,
    TopicValue,
};
