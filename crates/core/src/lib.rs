pub mod config;
pub mod domain;
pub mod errors;
pub mod fetch;
pub mod lookup;
pub mod registry;
pub mod store;

pub use domain::action::{ActionKind, ActionProposal, WriteOutcome};
pub use domain::module::{FieldKind, FieldSpec, ModuleDescriptor};
pub use domain::plan::{ExecutionContext, Plan, Step, StepAction};
pub use domain::record::{FetchReport, Fields, Record, SkipReason};
pub use errors::{ApplicationError, InterfaceError, UpstreamService};
pub use fetch::{FetchSettings, RecordFetcher};
pub use lookup::LookupResolver;
pub use registry::{ModuleRegistry, RegistryError};
pub use store::{RemoteStore, StoreError};
