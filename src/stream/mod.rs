//! Live video feed: one [`StreamLoop`] per connected viewer.

mod stream_loop;

pub use stream_loop::{
    mjpeg_part, StreamConfig, StreamDeps, StreamLoop, StreamStatus, StreamStatusBoard,
    MJPEG_BOUNDARY,
};
