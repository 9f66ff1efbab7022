//! Volume store contract

use crate::StorageResult;
use calclabels_common::BoundingBox;

/// Query options attached to every raw write
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WriteOptions {
    /// Ask the store to queue the request behind its own load limiter
    pub throttle: bool,
    /// Restrict the write to a region of interest
    pub roi: Option<String>,
}

/// Writes raw label subvolumes into one label instance
#[async_trait::async_trait]
pub trait VolumeStore: Send + Sync {
    /// Label instance endpoint, e.g. `http://host/api/node/<uuid>/<label-name>`
    fn location(&self) -> String;

    /// Post little-endian `u64` voxels covering `region` and return the HTTP status
    ///
    /// Transport failures are errors; any status the store answers with is returned as-is.
    async fn write_raw(
        &self,
        region: &BoundingBox,
        options: &WriteOptions,
        body: &[u8],
    ) -> StorageResult<u16>;

    /// Create the label instance, accepting one that already exists
    async fn create_label_instance(&self) -> StorageResult<()>;
}
