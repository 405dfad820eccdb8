pub mod api;
pub mod download;
pub mod endpoints;
pub mod patterns;
pub mod svn;

pub use api::ApiConnector;
pub use download::ArchiveFetcher;
pub use endpoints::Endpoints;
pub use patterns::ChangelogPatterns;
pub use svn::{SvnConnector, svn_available};
