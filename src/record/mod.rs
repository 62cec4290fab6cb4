mod error;
mod heap_file;
mod page;
mod record;
mod scan;

pub use error::{RecordError, RecordResult};
pub use heap_file::{HeapFile, MAX_NAME_LEN};
pub use page::Page;
pub use record::{RecordId, SlotId};
pub use scan::{AttrType, CompOp, Filter, HeapFileScan, InsertFileScan};
