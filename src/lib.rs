//! Live object detection over a webcam feed.
//!
//! A [`pipeline::DetectionLoop`] waits for a [`capture::StreamHandle`] and a
//! [`detection::Detector`], then repeatedly detects on the newest frame, paints
//! the predictions onto an [`overlay::Surface`] and hands both to an
//! [`output::OutputSink`], once per display refresh.

pub mod capture;
pub mod config;
pub mod detection;
pub mod output;
pub mod overlay;
pub mod pipeline;
