//! Registration front-ends.
//!
//! Two ways to populate a [`crate::app::WebApp`] from an archive: the
//! `WEB-INF/web.yaml` descriptor and the annotation index. The deployer
//! applies the descriptor first, then the scan; scanned entries never
//! override descriptor entries.

pub mod descriptor;
pub mod scanner;

pub use descriptor::{WebDescriptor, DescriptorError, DESCRIPTOR_PATH};
pub use scanner::{ScanError, WEB_FILTER, WEB_LISTENER, WEB_SERVLET};
