pub mod domain;
pub mod hostname;
pub mod resolver;
pub mod store;
pub mod theme;

pub use domain::{validate_domain, DomainKind, DomainRecord, DomainStatus, DomainValidationError};
pub use hostname::HostName;
pub use resolver::{
    DomainMapping, PreviewRule, Resolution, ResolutionSource, ResolveError, ResolverConfig,
    StoreDirectory, StoreResolver, Strategy,
};
pub use store::StoreRecord;
pub use theme::{ThemeCatalog, ThemeDefinition, ThemeSettings};
