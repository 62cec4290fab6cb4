use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use super::error::{FileError, FileResult};
use super::{PAGE_SIZE, PageId};

/// Handle to an open file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FileHandle(usize);

impl FileHandle {
    pub fn as_usize(&self) -> usize {
        self.0
    }
}

/// Manages paged file operations
pub struct PagedFileManager {
    /// Map from file handles to open files
    open_files: HashMap<FileHandle, FileEntry>,
    /// Map from file paths to handles (for checking if already open)
    path_to_handle: HashMap<PathBuf, FileHandle>,
    /// Next available file handle
    next_handle: usize,
    /// Maximum number of open files
    max_open_files: usize,
}

struct FileEntry {
    file: File,
    path: PathBuf,
    /// Disposed page numbers available for reallocation. In-memory only;
    /// a closed file forgets its free pages.
    free_pages: Vec<PageId>,
}

impl PagedFileManager {
    /// Create a new paged file manager
    pub fn new() -> Self {
        Self::with_max_files(128)
    }

    /// Create a new paged file manager with specified max open files
    pub fn with_max_files(max_open_files: usize) -> Self {
        Self {
            open_files: HashMap::new(),
            path_to_handle: HashMap::new(),
            next_handle: 0,
            max_open_files,
        }
    }

    /// Create a new file
    pub fn create_file<P: AsRef<Path>>(&mut self, path: P) -> FileResult<()> {
        let path = path.as_ref();

        if path.exists() {
            return Err(FileError::FileAlreadyExists(path.display().to_string()));
        }

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        File::create(path)?;
        Ok(())
    }

    /// Open an existing file
    pub fn open_file<P: AsRef<Path>>(&mut self, path: P) -> FileResult<FileHandle> {
        let path_ref = path.as_ref();
        let path = path_ref
            .canonicalize()
            .map_err(|_| FileError::FileNotFound(path_ref.display().to_string()))?;

        // Check if file is already open
        if let Some(&handle) = self.path_to_handle.get(&path) {
            return Ok(handle);
        }

        if self.open_files.len() >= self.max_open_files {
            return Err(FileError::TooManyOpenFiles);
        }

        let file = OpenOptions::new().read(true).write(true).open(&path)?;

        let handle = FileHandle(self.next_handle);
        self.next_handle += 1;

        self.open_files.insert(
            handle,
            FileEntry {
                file,
                path: path.clone(),
                free_pages: Vec::new(),
            },
        );
        self.path_to_handle.insert(path, handle);

        Ok(handle)
    }

    /// Close a file
    pub fn close_file(&mut self, handle: FileHandle) -> FileResult<()> {
        let entry = self
            .open_files
            .remove(&handle)
            .ok_or(FileError::InvalidHandle(handle.0))?;

        self.path_to_handle.remove(&entry.path);
        Ok(())
    }

    /// Remove (delete) a file
    pub fn remove_file<P: AsRef<Path>>(&mut self, path: P) -> FileResult<()> {
        let path = path.as_ref();

        // If file is open, close it first
        if let Ok(canonical_path) = path.canonicalize() {
            if let Some(&handle) = self.path_to_handle.get(&canonical_path) {
                self.close_file(handle)?;
            }
        }

        std::fs::remove_file(path)?;
        Ok(())
    }

    /// Get the handle of a file if it is currently open
    pub fn handle_for<P: AsRef<Path>>(&self, path: P) -> Option<FileHandle> {
        let path = path.as_ref().canonicalize().ok()?;
        self.path_to_handle.get(&path).copied()
    }

    /// Allocate the next page of a file and return its page number.
    /// Disposed pages are reused before the file is extended.
    pub fn allocate_page(&mut self, handle: FileHandle) -> FileResult<PageId> {
        let entry = self.entry_mut(handle)?;

        if let Some(page_id) = entry.free_pages.pop() {
            return Ok(page_id);
        }

        let file_size = entry.file.metadata()?.len();
        let page_id = file_size.div_ceil(PAGE_SIZE as u64) as PageId;
        entry.file.set_len(((page_id + 1) * PAGE_SIZE) as u64)?;
        Ok(page_id)
    }

    /// Return a page to the file's free list
    pub fn dispose_page(&mut self, handle: FileHandle, page_id: PageId) -> FileResult<()> {
        let page_count = self.page_count(handle)?;
        let entry = self.entry_mut(handle)?;

        if page_id >= page_count || entry.free_pages.contains(&page_id) {
            return Err(FileError::InvalidPage(page_id));
        }

        entry.free_pages.push(page_id);
        Ok(())
    }

    /// Get the page number of the first page of a file
    pub fn first_page(&mut self, handle: FileHandle) -> FileResult<PageId> {
        if self.page_count(handle)? == 0 {
            return Err(FileError::EmptyFile);
        }
        Ok(0)
    }

    /// Read a page from a file
    pub fn read_page(
        &mut self,
        handle: FileHandle,
        page_id: PageId,
        buffer: &mut [u8],
    ) -> FileResult<()> {
        if buffer.len() != PAGE_SIZE {
            return Err(FileError::InvalidPageSize {
                expected: PAGE_SIZE,
                actual: buffer.len(),
            });
        }

        let entry = self
            .open_files
            .get_mut(&handle)
            .ok_or(FileError::InvalidHandle(handle.0))?;

        let offset = (page_id * PAGE_SIZE) as u64;
        entry.file.seek(SeekFrom::Start(offset))?;

        let bytes_read = entry.file.read(buffer)?;

        // Reads past the end of the file yield zeroed bytes
        if bytes_read < PAGE_SIZE {
            buffer[bytes_read..].fill(0);
        }

        Ok(())
    }

    /// Write a page to a file
    pub fn write_page(
        &mut self,
        handle: FileHandle,
        page_id: PageId,
        buffer: &[u8],
    ) -> FileResult<()> {
        if buffer.len() != PAGE_SIZE {
            return Err(FileError::InvalidPageSize {
                expected: PAGE_SIZE,
                actual: buffer.len(),
            });
        }

        let entry = self
            .open_files
            .get_mut(&handle)
            .ok_or(FileError::InvalidHandle(handle.0))?;

        let offset = (page_id * PAGE_SIZE) as u64;
        let required_size = offset + PAGE_SIZE as u64;

        // Extend file if necessary to ensure we can write at this offset
        let current_size = entry.file.metadata()?.len();
        if current_size < required_size {
            entry.file.set_len(required_size)?;
        }

        entry.file.seek(SeekFrom::Start(offset))?;
        entry.file.write_all(buffer)?;
        // Don't sync on every write - let the OS buffer and batch writes.
        // Sync happens in sync_file / sync_all.

        Ok(())
    }

    /// Get the number of pages in a file
    pub fn page_count(&mut self, handle: FileHandle) -> FileResult<usize> {
        let entry = self
            .open_files
            .get_mut(&handle)
            .ok_or(FileError::InvalidHandle(handle.0))?;

        let file_size = entry.file.metadata()?.len();
        Ok(file_size.div_ceil(PAGE_SIZE as u64) as usize)
    }

    /// Sync a file to disk (flush all OS buffers)
    pub fn sync_file(&mut self, handle: FileHandle) -> FileResult<()> {
        let entry = self
            .open_files
            .get_mut(&handle)
            .ok_or(FileError::InvalidHandle(handle.0))?;

        entry.file.sync_data()?;
        Ok(())
    }

    /// Sync all open files to disk
    pub fn sync_all(&mut self) -> FileResult<()> {
        for entry in self.open_files.values_mut() {
            entry.file.sync_data()?;
        }
        Ok(())
    }

    /// Check if a file is open
    pub fn is_file_open(&self, handle: FileHandle) -> bool {
        self.open_files.contains_key(&handle)
    }

    /// Get the number of currently open files
    pub fn open_file_count(&self) -> usize {
        self.open_files.len()
    }

    fn entry_mut(&mut self, handle: FileHandle) -> FileResult<&mut FileEntry> {
        self.open_files
            .get_mut(&handle)
            .ok_or(FileError::InvalidHandle(handle.0))
    }
}

impl Default for PagedFileManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn setup_test_dir() -> TempDir {
        tempfile::tempdir().unwrap()
    }

    #[test]
    fn test_create_file() {
        let temp_dir = setup_test_dir();
        let test_file = temp_dir.path().join("test.db");
        let mut manager = PagedFileManager::new();

        assert!(manager.create_file(&test_file).is_ok());
        assert!(test_file.exists());
    }

    #[test]
    fn test_create_file_already_exists() {
        let temp_dir = setup_test_dir();
        let test_file = temp_dir.path().join("test.db");
        let mut manager = PagedFileManager::new();

        manager.create_file(&test_file).unwrap();
        let result = manager.create_file(&test_file);
        assert!(matches!(result, Err(FileError::FileAlreadyExists(_))));
    }

    #[test]
    fn test_open_close_file() {
        let temp_dir = setup_test_dir();
        let test_file = temp_dir.path().join("test.db");
        let mut manager = PagedFileManager::new();

        manager.create_file(&test_file).unwrap();
        let handle = manager.open_file(&test_file).unwrap();
        assert!(manager.is_file_open(handle));
        assert_eq!(manager.handle_for(&test_file), Some(handle));

        manager.close_file(handle).unwrap();
        assert!(!manager.is_file_open(handle));
        assert_eq!(manager.handle_for(&test_file), None);
    }

    #[test]
    fn test_open_nonexistent_file() {
        let temp_dir = setup_test_dir();
        let test_file = temp_dir.path().join("nonexistent.db");
        let mut manager = PagedFileManager::new();

        let result = manager.open_file(&test_file);
        assert!(matches!(result, Err(FileError::FileNotFound(_))));
    }

    #[test]
    fn test_open_same_file_twice() {
        let temp_dir = setup_test_dir();
        let test_file = temp_dir.path().join("test.db");
        let mut manager = PagedFileManager::new();

        manager.create_file(&test_file).unwrap();
        let handle1 = manager.open_file(&test_file).unwrap();
        let handle2 = manager.open_file(&test_file).unwrap();

        assert_eq!(handle1, handle2);
        assert_eq!(manager.open_file_count(), 1);
    }

    #[test]
    fn test_read_write_page() {
        let temp_dir = setup_test_dir();
        let test_file = temp_dir.path().join("test.db");
        let mut manager = PagedFileManager::new();

        manager.create_file(&test_file).unwrap();
        let handle = manager.open_file(&test_file).unwrap();

        let mut write_buffer = vec![0u8; PAGE_SIZE];
        write_buffer[0] = 42;
        write_buffer[100] = 99;
        write_buffer[PAGE_SIZE - 1] = 255;

        manager.write_page(handle, 0, &write_buffer).unwrap();

        let mut read_buffer = vec![0u8; PAGE_SIZE];
        manager.read_page(handle, 0, &mut read_buffer).unwrap();

        assert_eq!(read_buffer, write_buffer);
    }

    #[test]
    fn test_read_nonexistent_page() {
        let temp_dir = setup_test_dir();
        let test_file = temp_dir.path().join("test.db");
        let mut manager = PagedFileManager::new();

        manager.create_file(&test_file).unwrap();
        let handle = manager.open_file(&test_file).unwrap();

        // Reading a page that doesn't exist should return zeros
        let mut buffer = vec![0u8; PAGE_SIZE];
        manager.read_page(handle, 100, &mut buffer).unwrap();
        assert!(buffer.iter().all(|&b| b == 0));
    }

    #[test]
    fn test_allocate_pages_sequentially() {
        let temp_dir = setup_test_dir();
        let test_file = temp_dir.path().join("test.db");
        let mut manager = PagedFileManager::new();

        manager.create_file(&test_file).unwrap();
        let handle = manager.open_file(&test_file).unwrap();

        assert_eq!(manager.page_count(handle).unwrap(), 0);
        assert_eq!(manager.allocate_page(handle).unwrap(), 0);
        assert_eq!(manager.allocate_page(handle).unwrap(), 1);
        assert_eq!(manager.allocate_page(handle).unwrap(), 2);
        assert_eq!(manager.page_count(handle).unwrap(), 3);
    }

    #[test]
    fn test_allocate_reuses_disposed_page() {
        let temp_dir = setup_test_dir();
        let test_file = temp_dir.path().join("test.db");
        let mut manager = PagedFileManager::new();

        manager.create_file(&test_file).unwrap();
        let handle = manager.open_file(&test_file).unwrap();

        manager.allocate_page(handle).unwrap();
        manager.allocate_page(handle).unwrap();
        manager.allocate_page(handle).unwrap();

        manager.dispose_page(handle, 1).unwrap();
        assert_eq!(manager.allocate_page(handle).unwrap(), 1);
        assert_eq!(manager.allocate_page(handle).unwrap(), 3);
    }

    #[test]
    fn test_dispose_invalid_page() {
        let temp_dir = setup_test_dir();
        let test_file = temp_dir.path().join("test.db");
        let mut manager = PagedFileManager::new();

        manager.create_file(&test_file).unwrap();
        let handle = manager.open_file(&test_file).unwrap();

        let result = manager.dispose_page(handle, 5);
        assert!(matches!(result, Err(FileError::InvalidPage(5))));

        manager.allocate_page(handle).unwrap();
        manager.dispose_page(handle, 0).unwrap();
        let result = manager.dispose_page(handle, 0);
        assert!(matches!(result, Err(FileError::InvalidPage(0))));
    }

    #[test]
    fn test_first_page() {
        let temp_dir = setup_test_dir();
        let test_file = temp_dir.path().join("test.db");
        let mut manager = PagedFileManager::new();

        manager.create_file(&test_file).unwrap();
        let handle = manager.open_file(&test_file).unwrap();

        assert!(matches!(
            manager.first_page(handle),
            Err(FileError::EmptyFile)
        ));

        manager.allocate_page(handle).unwrap();
        assert_eq!(manager.first_page(handle).unwrap(), 0);
    }

    #[test]
    fn test_remove_open_file() {
        let temp_dir = setup_test_dir();
        let test_file = temp_dir.path().join("test.db");
        let mut manager = PagedFileManager::new();

        manager.create_file(&test_file).unwrap();
        let handle = manager.open_file(&test_file).unwrap();
        assert!(manager.is_file_open(handle));

        manager.remove_file(&test_file).unwrap();
        assert!(!test_file.exists());
        assert!(!manager.is_file_open(handle));
    }

    #[test]
    fn test_invalid_buffer_size() {
        let temp_dir = setup_test_dir();
        let test_file = temp_dir.path().join("test.db");
        let mut manager = PagedFileManager::new();

        manager.create_file(&test_file).unwrap();
        let handle = manager.open_file(&test_file).unwrap();

        let mut small_buffer = vec![0u8; PAGE_SIZE - 1];
        let result = manager.read_page(handle, 0, &mut small_buffer);
        assert!(matches!(result, Err(FileError::InvalidPageSize { .. })));

        let large_buffer = vec![0u8; PAGE_SIZE + 1];
        let result = manager.write_page(handle, 0, &large_buffer);
        assert!(matches!(result, Err(FileError::InvalidPageSize { .. })));
    }

    #[test]
    fn test_max_open_files() {
        let temp_dir = setup_test_dir();
        let mut manager = PagedFileManager::with_max_files(2);

        let file1 = temp_dir.path().join("test1.db");
        let file2 = temp_dir.path().join("test2.db");
        let file3 = temp_dir.path().join("test3.db");

        manager.create_file(&file1).unwrap();
        manager.create_file(&file2).unwrap();
        manager.create_file(&file3).unwrap();

        manager.open_file(&file1).unwrap();
        manager.open_file(&file2).unwrap();

        let result = manager.open_file(&file3);
        assert!(matches!(result, Err(FileError::TooManyOpenFiles)));
    }
}
