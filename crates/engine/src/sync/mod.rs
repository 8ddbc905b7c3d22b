//! Draft synchronization
//!
//! - **Plan**: one [`SheetAction`] per staged sheet
//! - **Pool**: bounded worker threads with per-chunk retries
//! - **Upload**: two-phase file transfer then positioned row writes

mod plan;
mod pool;
mod upload;

pub use plan::{SheetAction, SheetPlan};
pub use upload::{SheetReport, UploadReport};

pub(crate) use upload::upload_sheets;
