use std::io;
use thiserror::Error;

use super::PageId;

#[derive(Debug, Error)]
pub enum FileError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("File not found: {0}")]
    FileNotFound(String),

    #[error("File already exists: {0}")]
    FileAlreadyExists(String),

    #[error("Invalid file handle: {0}")]
    InvalidHandle(usize),

    #[error("Invalid page: page_id={0}")]
    InvalidPage(PageId),

    #[error("Invalid page size: expected {expected}, got {actual}")]
    InvalidPageSize { expected: usize, actual: usize },

    #[error("File has no pages")]
    EmptyFile,

    #[error("File handle limit reached")]
    TooManyOpenFiles,
}

pub type FileResult<T> = Result<T, FileError>;

#[derive(Debug, Error)]
pub enum BufferError {
    #[error("File error: {0}")]
    File(#[from] FileError),

    #[error("All buffer frames are pinned")]
    BufferExceeded,

    #[error("Page not resident in buffer pool: page_id={0}")]
    PageNotResident(PageId),

    #[error("Page is resident but not pinned: page_id={0}")]
    PageNotPinned(PageId),

    #[error("Page is still pinned: page_id={0}")]
    PagePinned(PageId),

    #[error("Residency mapping already present: page_id={0}")]
    DuplicateMapping(PageId),

    #[error("Invalid frame state: frame={0}")]
    BadBuffer(usize),
}

pub type BufResult<T> = Result<T, BufferError>;
