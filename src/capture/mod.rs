mod webcam;

pub use webcam::open_camera;

use image::RgbImage;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use thiserror::Error;
use tokio::sync::watch;

/// Which camera the host prefers
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum FacingMode {
    /// Faces the user (front, integrated webcam)
    User,
    /// Faces away from the user (rear, world camera)
    Environment,
}

/// Capture request. Video only, no audio track is ever opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Constraints {
    pub facing_mode: FacingMode,
    /// Scale published frames to this geometry, like a fixed-size video element
    pub display_size: Option<(u32, u32)>,
}

impl Constraints {
    pub fn new(facing_mode: FacingMode) -> Self {
        Self {
            facing_mode,
            display_size: None,
        }
    }

    pub fn with_display_size(mut self, width: u32, height: u32) -> Self {
        self.display_size = Some((width, height));
        self
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AcquisitionError {
    #[error("camera access was denied")]
    PermissionDenied,
    #[error("no camera device available")]
    NoDevice,
    #[error("camera device is busy")]
    DeviceBusy,
    #[error("camera backend error: {0}")]
    Backend(String),
    #[error("camera stream ended")]
    StreamEnded,
}

/// One sampled image from the live stream.
///
/// Cloning is cheap; the pixels are shared.
#[derive(Debug, Clone)]
pub struct Frame {
    sequence: u64,
    image: Arc<RgbImage>,
}

impl Frame {
    pub fn new(sequence: u64, image: RgbImage) -> Self {
        Self {
            sequence,
            image: Arc::new(image),
        }
    }

    /// Position of this frame in the stream, starting at 0
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn image(&self) -> &Arc<RgbImage> {
        &self.image
    }

    pub fn dimensions(&self) -> (u32, u32) {
        self.image.dimensions()
    }
}

/// Producer side of a frame stream. Each publish replaces the previous frame.
pub struct FramePublisher {
    tx: watch::Sender<Option<Frame>>,
    next_sequence: u64,
}

impl FramePublisher {
    /// Publish a frame, returning its sequence number
    pub fn publish(&mut self, image: RgbImage) -> u64 {
        let sequence = self.next_sequence;
        self.next_sequence += 1;
        self.tx.send_replace(Some(Frame::new(sequence, image)));
        sequence
    }

    /// True once every `StreamHandle` has been dropped
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Create a publisher and the stream handle reading from it
pub fn frame_channel() -> (FramePublisher, StreamHandle) {
    let (tx, rx) = watch::channel(None);
    let publisher = FramePublisher { tx, next_sequence: 0 };
    let handle = StreamHandle {
        frames: rx,
        geometry: None,
        worker: None,
    };
    (publisher, handle)
}

/// Thread that owns a capture device
pub(crate) struct CaptureWorker {
    stop: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl CaptureWorker {
    pub(crate) fn new(stop: Arc<AtomicBool>, thread: JoinHandle<()>) -> Self {
        Self {
            stop,
            thread: Some(thread),
        }
    }
}

impl Drop for CaptureWorker {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Release);
    }
}

/// Owned handle to a live video stream.
///
/// Always yields the newest frame; frames published between two reads are
/// dropped, never queued.
pub struct StreamHandle {
    frames: watch::Receiver<Option<Frame>>,
    geometry: Option<(u32, u32)>,
    worker: Option<CaptureWorker>,
}

impl StreamHandle {
    pub(crate) fn with_worker(mut self, worker: CaptureWorker) -> Self {
        self.worker = Some(worker);
        self
    }

    /// Wait for the first frame and return its geometry.
    ///
    /// The first frame is awaited once; later calls return the cached geometry.
    pub async fn ready(&mut self) -> Result<(u32, u32), AcquisitionError> {
        if let Some(geometry) = self.geometry {
            return Ok(geometry);
        }

        let geometry = {
            let frame = self
                .frames
                .wait_for(Option::is_some)
                .await
                .map_err(|_| AcquisitionError::StreamEnded)?;
            frame
                .as_ref()
                .map(Frame::dimensions)
                .ok_or(AcquisitionError::StreamEnded)?
        };

        tracing::info!("Video stream ready at {}x{}", geometry.0, geometry.1);
        self.geometry = Some(geometry);
        Ok(geometry)
    }

    /// Geometry reported by `ready`, if it has resolved
    pub fn geometry(&self) -> Option<(u32, u32)> {
        self.geometry
    }

    /// Newest frame on the stream
    pub fn current_frame(&mut self) -> Result<Frame, AcquisitionError> {
        if self.frames.has_changed().is_err() {
            return Err(AcquisitionError::StreamEnded);
        }
        self.frames
            .borrow_and_update()
            .clone()
            .ok_or(AcquisitionError::StreamEnded)
    }

    /// Stop the producer and wait for the device to be released
    pub async fn close(mut self) {
        let Some(mut worker) = self.worker.take() else {
            return;
        };
        worker.stop.store(true, Ordering::Release);
        if let Some(thread) = worker.thread.take() {
            match tokio::task::spawn_blocking(move || thread.join()).await {
                Ok(Ok(())) => tracing::debug!("Capture thread joined"),
                Ok(Err(_)) => tracing::warn!("Capture thread panicked"),
                Err(e) => tracing::warn!("Failed to join capture thread: {}", e),
            }
        }
    }
}

/// A worker whose thread waits for stop, then lingers before flagging release
#[cfg(test)]
pub(crate) fn lingering_worker(
    linger: std::time::Duration,
) -> (CaptureWorker, Arc<AtomicBool>) {
    let stop = Arc::new(AtomicBool::new(false));
    let released = Arc::new(AtomicBool::new(false));
    let thread = {
        let stop = stop.clone();
        let released = released.clone();
        std::thread::spawn(move || {
            while !stop.load(Ordering::Acquire) {
                std::thread::sleep(std::time::Duration::from_millis(1));
            }
            std::thread::sleep(linger);
            released.store(true, Ordering::Release);
        })
    };
    (CaptureWorker::new(stop, thread), released)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn close_waits_for_the_capture_thread() {
        let (worker, released) = lingering_worker(Duration::from_millis(100));
        let (_publisher, stream) = frame_channel();

        stream.with_worker(worker).close().await;
        assert!(released.load(Ordering::Acquire));
    }

    #[tokio::test]
    async fn dropping_the_handle_only_signals_stop() {
        let (worker, released) = lingering_worker(Duration::from_millis(100));
        let (_publisher, stream) = frame_channel();

        drop(stream.with_worker(worker));
        assert!(!released.load(Ordering::Acquire));
    }

    #[tokio::test]
    async fn ready_waits_for_first_frame_and_caches_geometry() {
        let (mut publisher, mut stream) = frame_channel();
        assert_eq!(stream.geometry(), None);

        publisher.publish(RgbImage::new(64, 48));
        assert_eq!(stream.ready().await, Ok((64, 48)));

        // a later frame with a different size does not re-fire readiness
        publisher.publish(RgbImage::new(32, 32));
        assert_eq!(stream.ready().await, Ok((64, 48)));
        assert_eq!(stream.current_frame().unwrap().dimensions(), (32, 32));
    }

    #[tokio::test]
    async fn current_frame_skips_to_newest() {
        let (mut publisher, mut stream) = frame_channel();
        publisher.publish(RgbImage::new(4, 4));
        publisher.publish(RgbImage::new(4, 4));
        let last = publisher.publish(RgbImage::new(4, 4));

        let frame = stream.current_frame().unwrap();
        assert_eq!(frame.sequence(), last);
    }

    #[tokio::test]
    async fn ended_stream_is_reported() {
        let (publisher, mut stream) = frame_channel();
        drop(publisher);
        assert_eq!(stream.ready().await, Err(AcquisitionError::StreamEnded));
        assert_eq!(
            stream.current_frame().unwrap_err(),
            AcquisitionError::StreamEnded
        );
    }

    #[test]
    fn publisher_sees_closed_stream() {
        let (publisher, stream) = frame_channel();
        assert!(!publisher.is_closed());
        drop(stream);
        assert!(publisher.is_closed());
    }
}
