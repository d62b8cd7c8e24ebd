//! Pipeline front-ends.
//!
//! Two entry points share the same scheduler underneath:
//!
//! * [`LivePipeline`] — audio arrives incrementally while a recording runs;
//!   segments are dispatched as soon as they are complete.
//! * [`BatchPipeline`] — the full audio is known up front (a WAV file or a
//!   buffer); every segment is planned and enqueued before scheduling
//!   starts. Resuming a crashed run also goes through the batch path, since
//!   the stored segments are the whole input by then.
//!
//! Both hand back an event receiver: progress snapshots while work is in
//! flight, then exactly one terminal event, unless the run is cancelled, in
//! which case the stream just closes.

pub mod batch;
pub mod live;

pub use batch::BatchPipeline;
pub use live::LivePipeline;
