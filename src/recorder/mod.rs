//! The flight recorder: delta/keyframe capture and playback of a `World`
//! (spec §4.11, §4.12, §4.13).

pub mod format;
pub mod reader;
pub mod writer;

pub use format::RecorderConfig;
pub use reader::{MaskDesync, Playback, PlaybackSummary};
pub use writer::Recorder;
