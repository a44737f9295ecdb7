//! Transfer session manager.
//!
//! - [`sender`]: chunking and flow control on the sending side
//! - [`receiver`]: session lookup and reassembly on the receiving side
//! - [`progress`]: byte counting and rate sampling
//! - [`session`]: status, events and errors shared by both sides

pub mod progress;
pub mod receiver;
pub mod sender;
pub mod session;

pub use progress::{format_bytes, format_rate, ProgressSnapshot, ProgressTracker};
pub use receiver::{FileReceiver, ReceivedFile};
pub use sender::{media_type_for, FileSender, SendReport, SenderSettings};
pub use session::{
    Direction, EventSink, TransferError, TransferEvent, TransferSession, TransferStatus,
};
