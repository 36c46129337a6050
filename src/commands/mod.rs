//! CLI commands implementation

pub mod audit;
pub mod extract;
pub mod init;
pub mod prune;
pub mod run;
pub mod status;
pub mod transform;

pub use audit::*;
pub use extract::*;
pub use init::*;
pub use prune::*;
pub use run::*;
pub use status::*;
pub use transform::*;
