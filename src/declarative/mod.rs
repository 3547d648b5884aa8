//! YAML-defined agents: parsing, caching and sample seeding.

pub mod cache;
pub mod loader;
pub mod seed;

pub use cache::DeclarativeCache;
pub use loader::{DeclarativeLoader, DefinitionModel, LoaderError, YamlErrorLocation, check_yaml_syntax};
pub use seed::{SeedStats, seed_definitions, seed_sources};
