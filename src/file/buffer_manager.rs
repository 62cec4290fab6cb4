use log::{debug, warn};

use super::error::{BufResult, BufferError};
use super::file_manager::{FileHandle, PagedFileManager};
use super::frame::{BufferKey, FrameDesc, FrameTable};
use super::{DEFAULT_POOL_SIZE, PAGE_SIZE, PageId};

/// Caches pages of open files in a fixed pool of frames.
///
/// Callers pin pages with `read_page`/`alloc_page` and must release each
/// pin with a matching `unpin_page`. A frame is eligible for replacement
/// only when every pin on it has been released; replacement is clock with
/// a one-sweep second chance for recently referenced frames. Dirty frames
/// are written back to their file before the frame is reused.
pub struct BufferManager {
    /// Underlying file manager; all reads, write-backs and page
    /// allocations go through it
    file_manager: PagedFileManager,
    /// One descriptor per frame, parallel to `pool`
    frames: Vec<FrameDesc>,
    /// The page-sized frames themselves
    pool: Vec<[u8; PAGE_SIZE]>,
    /// Residency index over `(file, page_id)`
    frame_table: FrameTable,
    /// Current clock position; `alloc_frame` advances before examining
    clock_hand: usize,
}

impl BufferManager {
    /// Create a new buffer manager with the default pool size
    pub fn new(file_manager: PagedFileManager) -> Self {
        Self::with_capacity(file_manager, DEFAULT_POOL_SIZE)
    }

    /// Create a new buffer manager with `pool_size` frames
    pub fn with_capacity(file_manager: PagedFileManager, pool_size: usize) -> Self {
        assert!(pool_size > 0, "buffer pool needs at least one frame");

        let frames = (0..pool_size).map(FrameDesc::new).collect();
        Self {
            file_manager,
            frames,
            pool: vec![[0u8; PAGE_SIZE]; pool_size],
            frame_table: FrameTable::new(pool_size),
            // The first advance lands on frame 0
            clock_hand: pool_size - 1,
        }
    }

    /// Get a reference to the file manager
    pub fn file_manager(&self) -> &PagedFileManager {
        &self.file_manager
    }

    /// Get a mutable reference to the file manager
    pub fn file_manager_mut(&mut self) -> &mut PagedFileManager {
        &mut self.file_manager
    }

    fn advance_clock(&mut self) {
        self.clock_hand = (self.clock_hand + 1) % self.frames.len();
    }

    /// Select a frame for reuse with clock replacement.
    ///
    /// Invalid frames are taken immediately. A referenced frame gets a
    /// second chance (its ref bit is cleared); a pinned frame is skipped
    /// and counted. Once every frame has been seen pinned the sweep has
    /// proven the pool exhausted and `BufferExceeded` is returned — this
    /// takes at most two passes, one to clear ref bits and one to
    /// reclassify. A dirty victim is written back before its descriptor
    /// is cleared.
    fn alloc_frame(&mut self) -> BufResult<usize> {
        let pool_size = self.frames.len();
        let mut pinned_seen = 0;

        loop {
            if pinned_seen == pool_size {
                return Err(BufferError::BufferExceeded);
            }

            self.advance_clock();
            let hand = self.clock_hand;
            let desc = &mut self.frames[hand];

            if !desc.valid {
                let frame_no = desc.frame_no;
                desc.clear();
                return Ok(frame_no);
            }
            if desc.ref_bit {
                desc.ref_bit = false;
                continue;
            }
            if desc.pin_count > 0 {
                pinned_seen += 1;
                continue;
            }

            // Unpinned, unreferenced: this frame is the victim
            let page_id = desc.page_id;
            let dirty = desc.dirty;
            let Some(file) = desc.file else {
                return Err(BufferError::BadBuffer(hand));
            };

            if dirty {
                debug!(
                    "evicting dirty page {} of file {} from frame {}",
                    page_id,
                    file.as_usize(),
                    hand
                );
                self.file_manager.write_page(file, page_id, &self.pool[hand])?;
            }

            self.frame_table.remove(BufferKey { file, page_id })?;
            self.frames[hand].clear();
            return Ok(hand);
        }
    }

    /// Read a page into the pool (or find it already resident) and pin it
    /// on behalf of the caller. The returned slice is valid until the next
    /// call on this buffer manager; the pin persists until `unpin_page`.
    pub fn read_page(&mut self, file: FileHandle, page_id: PageId) -> BufResult<&mut [u8]> {
        let key = BufferKey { file, page_id };

        if let Some(frame_no) = self.frame_table.lookup(key) {
            let desc = &mut self.frames[frame_no];
            desc.ref_bit = true;
            desc.pin_count += 1;
            return Ok(&mut self.pool[frame_no]);
        }

        let frame_no = self.alloc_frame()?;
        if let Err(err) = self
            .file_manager
            .read_page(file, page_id, &mut self.pool[frame_no])
        {
            // Best effort; the read error is what the caller sees
            let _ = self.file_manager.dispose_page(file, page_id);
            return Err(err.into());
        }
        self.frame_table.insert(key, frame_no)?;
        self.frames[frame_no].set(file, page_id);
        Ok(&mut self.pool[frame_no])
    }

    /// Allocate a fresh page in `file` and pin it in the pool.
    /// The frame contents are whatever the frame last held; callers
    /// initialise the page themselves.
    pub fn alloc_page(&mut self, file: FileHandle) -> BufResult<(PageId, &mut [u8])> {
        let page_id = self.file_manager.allocate_page(file)?;
        let frame_no = self.alloc_frame()?;
        self.frame_table.insert(BufferKey { file, page_id }, frame_no)?;
        self.frames[frame_no].set(file, page_id);
        Ok((page_id, &mut self.pool[frame_no]))
    }

    /// Re-borrow a page the caller already holds a pin on. The pin count
    /// is unchanged; the borrow ends with the returned slice.
    pub fn pinned_page(&mut self, file: FileHandle, page_id: PageId) -> BufResult<&mut [u8]> {
        let key = BufferKey { file, page_id };
        let frame_no = self
            .frame_table
            .lookup(key)
            .ok_or(BufferError::PageNotResident(page_id))?;

        let desc = &mut self.frames[frame_no];
        if desc.pin_count == 0 {
            return Err(BufferError::PageNotPinned(page_id));
        }
        desc.ref_bit = true;
        Ok(&mut self.pool[frame_no])
    }

    /// Release one pin on a page. `dirty = true` marks the frame dirty;
    /// the mark is never cleared by unpinning. The page stays resident
    /// and becomes replaceable once its pin count reaches zero.
    pub fn unpin_page(&mut self, file: FileHandle, page_id: PageId, dirty: bool) -> BufResult<()> {
        let key = BufferKey { file, page_id };
        let frame_no = self
            .frame_table
            .lookup(key)
            .ok_or(BufferError::PageNotResident(page_id))?;

        let desc = &mut self.frames[frame_no];
        if desc.pin_count == 0 {
            return Err(BufferError::PageNotPinned(page_id));
        }
        if dirty {
            desc.dirty = true;
        }
        desc.pin_count -= 1;
        Ok(())
    }

    /// Drop a page from the pool and deallocate it in the backing file.
    ///
    /// The frame is cleared even if pinned; the caller must hold no
    /// outstanding references to the page.
    pub fn dispose_page(&mut self, file: FileHandle, page_id: PageId) -> BufResult<()> {
        let key = BufferKey { file, page_id };
        if let Some(frame_no) = self.frame_table.lookup(key) {
            self.frames[frame_no].clear();
            self.frame_table.remove(key)?;
        }
        self.file_manager.dispose_page(file, page_id)?;
        Ok(())
    }

    /// Write back every dirty page of `file` and evict all of its pages
    /// from the pool. Fails with `PagePinned` if any page of the file is
    /// still pinned; after `Ok` nothing of `file` remains resident.
    pub fn flush_file(&mut self, file: FileHandle) -> BufResult<()> {
        for frame_no in 0..self.frames.len() {
            let desc = &self.frames[frame_no];

            if desc.valid && desc.file == Some(file) {
                if desc.pin_count > 0 {
                    return Err(BufferError::PagePinned(desc.page_id));
                }
                let page_id = desc.page_id;
                if desc.dirty {
                    self.file_manager
                        .write_page(file, page_id, &self.pool[frame_no])?;
                    self.frames[frame_no].dirty = false;
                }
                self.frame_table.remove(BufferKey { file, page_id })?;
                self.frames[frame_no].clear();
            } else if !desc.valid && desc.file == Some(file) {
                // clear() nulls the file, so a hit here means a corrupted
                // descriptor
                return Err(BufferError::BadBuffer(desc.frame_no));
            }
        }
        Ok(())
    }

    /// Number of frames in the pool
    pub fn pool_size(&self) -> usize {
        self.frames.len()
    }

    /// Number of pages currently resident
    pub fn resident_page_count(&self) -> usize {
        self.frame_table.len()
    }

    /// Number of resident dirty pages
    pub fn dirty_page_count(&self) -> usize {
        self.frames.iter().filter(|f| f.valid && f.dirty).count()
    }

    /// Check if a page is resident in the pool
    pub fn is_page_resident(&self, file: FileHandle, page_id: PageId) -> bool {
        self.frame_table.lookup(BufferKey { file, page_id }).is_some()
    }

    /// Pin count of a resident page, or `None` if the page is not resident
    pub fn pin_count_of(&self, file: FileHandle, page_id: PageId) -> Option<u32> {
        self.frame_table
            .lookup(BufferKey { file, page_id })
            .map(|frame_no| self.frames[frame_no].pin_count)
    }

    /// Assert the frame/residency-index invariants: every valid frame is
    /// mapped under its own identity and every mapping points back at a
    /// matching valid frame.
    #[cfg(test)]
    pub(crate) fn check_invariants(&self) {
        let mut valid_frames = 0;
        for desc in &self.frames {
            if desc.valid {
                valid_frames += 1;
                let file = desc.file.expect("valid frame must have a file");
                let key = BufferKey {
                    file,
                    page_id: desc.page_id,
                };
                assert_eq!(
                    self.frame_table.lookup(key),
                    Some(desc.frame_no),
                    "valid frame {} is not mapped under its identity",
                    desc.frame_no
                );
            } else {
                assert_eq!(desc.file, None, "invalid frame {} keeps a file", desc.frame_no);
            }
        }
        assert_eq!(valid_frames, self.frame_table.len());
    }
}

impl Drop for BufferManager {
    fn drop(&mut self) {
        // Best-effort write-back of whatever is still dirty; shutdown
        // must not fail
        for frame_no in 0..self.frames.len() {
            let desc = &self.frames[frame_no];
            if desc.valid && desc.dirty {
                let Some(file) = desc.file else { continue };
                if let Err(err) =
                    self.file_manager
                        .write_page(file, desc.page_id, &self.pool[frame_no])
                {
                    warn!(
                        "write-back of page {} failed during shutdown: {}",
                        desc.page_id, err
                    );
                }
            }
        }
    }
}
