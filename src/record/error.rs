use crate::file::{BufferError, FileError, PageId};
use thiserror::Error;

use super::record::SlotId;

#[derive(Debug, Error)]
pub enum RecordError {
    #[error("File error: {0}")]
    File(#[from] FileError),

    #[error("Buffer error: {0}")]
    Buffer(#[from] BufferError),

    #[error("No free space on page")]
    NoSpace,

    #[error("Record of {len} bytes exceeds the page capacity of {max} bytes")]
    RecordTooLarge { len: usize, max: usize },

    #[error("Invalid slot: page_id={0}, slot_id={1}")]
    InvalidSlot(PageId, SlotId),

    #[error("Bad scan parameter: {0}")]
    BadScanParam(String),

    #[error("Scan has no current record")]
    NoCurrentRecord,

    #[error("Scan has no saved mark")]
    NoMark,

    #[error("File name too long: {0}")]
    NameTooLong(String),

    #[error("Page corrupt: {0}")]
    Corrupt(String),
}

pub type RecordResult<T> = Result<T, RecordError>;
