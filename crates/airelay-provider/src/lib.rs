pub mod blacklist;
pub mod endpoint;
pub mod platform;
pub mod registry;
pub mod round_robin;
pub mod select;

pub use blacklist::BlacklistStore;
pub use endpoint::{ChatProvider, GeminiProvider, ProviderEndpoint, DEFAULT_PROVIDER_LEVEL};
pub use platform::Platform;
pub use registry::{ProviderRegistry, RegistrySnapshot};
pub use round_robin::RoundRobinState;
pub use select::{candidate_order, filter_providers, group_by_level, FilterOutcome};
