pub mod file;
pub mod record;

pub use file::{
    BufferManager, DEFAULT_POOL_SIZE, FileHandle, PAGE_SIZE, PageId, PagedFileManager,
};
pub use record::{HeapFile, HeapFileScan, InsertFileScan, RecordId};
