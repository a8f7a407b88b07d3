//! Topic bookkeeping: raw registry, exclude list, source bindings and
//! derived topics

pub mod derived;
pub mod exclude;
pub mod raw;
pub mod registry;
pub mod source;
pub mod types;

pub use derived::{DerivedTopic, DerivedTopicDeclaration, TopicPhase, DEFAULT_PRECISION};
pub use exclude::ExcludeList;
pub use raw::{
    FnListener, HistoryLimits, IngestOutcome, RawTopic, RawTopicDeclaration, RawTopicRegistry,
    SubscriptionId, TopicListener,
};
pub use registry::{BootstrapReport, DeclareOutcome, DerivedTopicRegistry};
pub use source::{BindingKind, SourceBinding, SourceSpec};
pub use types::{HistoryEntry, TopicValue};
