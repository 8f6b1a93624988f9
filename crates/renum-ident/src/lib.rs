//! Renum identifiers
//!
//! Realm/member identifiers and the pure mapping from the legacy numbering
//! plan to the new one.
//!
//! # Example
//!
//! ```
//! use renum_ident::{Identifier, IdentifierMapper, NumberingPlan};
//!
//! let mapper = IdentifierMapper::new(NumberingPlan::default()).unwrap();
//! let new = mapper.map_identifier(Identifier::new(1, 11)).unwrap();
//! assert_eq!(new.standard(), "17-0:1101");
//! ```

#![warn(missing_docs)]
#![warn(unreachable_pub)]

pub mod error;
pub mod identifier;
pub mod mapper;
pub mod plan;
pub mod service_name;

pub use error::{FatalConfigurationError, MapError, ParseError};
pub use identifier::{IdForm, Identifier, MAX_MEMBER};
pub use mapper::{CacheStats, IdentifierMapper, IdentifierResolver, IdentifierTable, MapCache, Memoized};
pub use plan::NumberingPlan;
pub use service_name::{rewrite_service_name, RewriteError, ServiceName};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
