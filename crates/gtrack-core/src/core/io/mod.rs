//! File I/O for the engine's inputs and outputs: the [`TrackSink`](traits::TrackSink)
//! abstraction used by track export, the MRtrix `.tck` format ([`tck`]) and plain-text
//! numeric matrices used for response kernels ([`matrix`]).

pub mod matrix;
pub mod tck;
pub mod traits;
