pub mod dirty;
pub mod stub_updater;

use crate::core::error::Result;
use crate::core::types::FileId;
use crate::stub::payload::IndexPayload;

/// Where the updater sends payload changes; implemented by the registered
/// secondary indices. Every call is made under the forward write lock.
pub trait IndexUpdateSink {
    /// A missing payload counts as empty
    fn payload_changed(&self, file: FileId, old: Option<&IndexPayload>, new: Option<&IndexPayload>) -> Result<()>;

    /// Drop `file` from every index without knowing its keys
    fn forget_file(&self, file: FileId) -> Result<()>;

    fn clear_all(&self) -> Result<()>;
    fn flush_all(&self) -> Result<()>;
}
