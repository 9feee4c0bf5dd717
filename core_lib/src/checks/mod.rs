pub mod builtin;
pub mod contract;
pub mod descriptor;
pub mod instance;
pub mod params;

pub use builtin::{Availability, Heartbeat, ManifestAvailability};
pub use contract::{CheckContract, CheckOutcome, ContractRegistry, FnContract};
pub use descriptor::{CheckDescriptor, CheckInfo, CheckRegistry};
pub use instance::{cache_key, CheckInstance};
pub use params::{CheckParams, ParamSpec, ParamType, ParamValue, ParameterSchema};
