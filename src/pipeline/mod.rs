mod stats;

pub use stats::LoopStats;

use crate::capture::{AcquisitionError, StreamHandle};
use crate::config::{refresh_period, DEFAULT_REFRESH_HZ};
use crate::detection::{DetectionError, Detections, Detector, LoadError};
use crate::output::OutputSink;
use crate::overlay::{OverlayRenderer, Surface};
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    Uninitialized,
    AwaitingSources,
    Running,
    Faulted,
    Stopped,
}

impl fmt::Display for LoopState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LoopState::Uninitialized => "uninitialized",
            LoopState::AwaitingSources => "awaiting sources",
            LoopState::Running => "running",
            LoopState::Faulted => "faulted",
            LoopState::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Error)]
pub enum LoopError {
    #[error("video source failed: {0}")]
    Acquisition(#[from] AcquisitionError),
    #[error("detector failed to load: {0}")]
    Load(#[from] LoadError),
    #[error("detection failed: {0}")]
    Detection(#[from] DetectionError),
    #[error("failed to present frame: {0:#}")]
    Output(anyhow::Error),
    #[error("detection loop task failed: {0}")]
    Task(String),
}

/// Where unrecoverable loop failures are reported
pub trait ErrorSink {
    fn report(&mut self, error: &LoopError);
}

/// Reports failures through `tracing`
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingErrorSink;

impl ErrorSink for TracingErrorSink {
    fn report(&mut self, error: &LoopError) {
        tracing::error!("Detection loop halted: {}", error);
    }
}

impl<F: FnMut(&LoopError)> ErrorSink for F {
    fn report(&mut self, error: &LoopError) {
        self(error)
    }
}

/// Sets the stop flag. Clones share the same flag.
#[derive(Debug, Clone)]
pub struct StopTrigger(Arc<watch::Sender<bool>>);

impl StopTrigger {
    pub fn stop(&self) {
        self.0.send_replace(true);
    }
}

/// Observes the stop flag
#[derive(Debug, Clone)]
pub struct StopSignal(watch::Receiver<bool>);

impl StopSignal {
    pub fn is_set(&self) -> bool {
        *self.0.borrow()
    }

    /// Resolves once stop is requested; never, if every trigger is gone unset
    pub async fn stopped(&mut self) {
        if self.0.wait_for(|stop| *stop).await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

pub fn stop_signal() -> (StopTrigger, StopSignal) {
    let (tx, rx) = watch::channel(false);
    (StopTrigger(Arc::new(tx)), StopSignal(rx))
}

/// How a loop that was not faulted ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoopSummary {
    pub cycles: u64,
    pub state: LoopState,
}

/// Runs detect, draw and present once per display refresh until stopped
/// or faulted.
pub struct DetectionLoop<S, O, E = TracingErrorSink> {
    surface: S,
    sink: O,
    renderer: OverlayRenderer,
    errors: E,
    refresh: Duration,
    state: watch::Sender<LoopState>,
}

impl<S, O> DetectionLoop<S, O>
where
    S: Surface,
    O: OutputSink<S>,
{
    pub fn new(surface: S, sink: O) -> Self {
        let (state, _) = watch::channel(LoopState::Uninitialized);
        Self {
            surface,
            sink,
            renderer: OverlayRenderer::default(),
            errors: TracingErrorSink,
            refresh: refresh_period(DEFAULT_REFRESH_HZ),
            state,
        }
    }
}

impl<S, O, E> DetectionLoop<S, O, E>
where
    S: Surface,
    O: OutputSink<S>,
    E: ErrorSink,
{
    pub fn with_refresh_rate(mut self, hz: u32) -> Self {
        self.refresh = refresh_period(hz);
        self
    }

    pub fn with_renderer(mut self, renderer: OverlayRenderer) -> Self {
        self.renderer = renderer;
        self
    }

    pub fn with_error_sink<E2: ErrorSink>(self, errors: E2) -> DetectionLoop<S, O, E2> {
        DetectionLoop {
            surface: self.surface,
            sink: self.sink,
            renderer: self.renderer,
            errors,
            refresh: self.refresh,
            state: self.state,
        }
    }

    /// Watch state transitions
    pub fn state(&self) -> watch::Receiver<LoopState> {
        self.state.subscribe()
    }

    /// Spawn the loop on the current `LocalSet` and return its handle
    pub fn start<D, V, M>(self, source: V, model: M) -> LoopHandle
    where
        S: 'static,
        O: 'static,
        E: 'static,
        D: Detector + 'static,
        V: Future<Output = Result<StreamHandle, AcquisitionError>> + 'static,
        M: Future<Output = Result<D, LoadError>> + 'static,
    {
        let (trigger, signal) = stop_signal();
        let state = self.state();
        let task = tokio::task::spawn_local(self.run(source, model, signal));
        LoopHandle {
            trigger,
            state,
            task,
        }
    }

    /// Wait for the video source and the detector, then cycle until `stop`
    /// is set or a failure halts the loop.
    ///
    /// A failure is reported to the error sink once and returned.
    pub async fn run<D, V, M>(
        mut self,
        source: V,
        model: M,
        mut stop: StopSignal,
    ) -> Result<LoopSummary, LoopError>
    where
        D: Detector,
        V: Future<Output = Result<StreamHandle, AcquisitionError>>,
        M: Future<Output = Result<D, LoadError>>,
    {
        self.set_state(LoopState::AwaitingSources);
        tracing::info!("Waiting for video source and detector");

        // The opened stream lives outside the setup future so that it can be
        // closed when setup fails or is cancelled by a stop
        let mut opened: Option<StreamHandle> = None;
        let setup = async {
            let stream = async {
                opened.insert(source.await?).ready().await?;
                Ok::<_, LoopError>(())
            };
            let detector = async { Ok::<_, LoopError>(model.await?) };
            tokio::try_join!(stream, detector).map(|((), detector)| detector)
        };

        let outcome = tokio::select! {
            biased;
            _ = stop.stopped() => Ok(None),
            ready = setup => ready.map(Some),
        };

        let mut detector = match outcome {
            Ok(Some(detector)) => detector,
            outcome => {
                if let Some(stream) = opened.take() {
                    stream.close().await;
                }
                return match outcome {
                    Err(e) => Err(self.fault(e)),
                    _ => {
                        tracing::info!("Stopped before sources were ready");
                        self.set_state(LoopState::Stopped);
                        Ok(LoopSummary {
                            cycles: 0,
                            state: LoopState::Stopped,
                        })
                    }
                };
            }
        };
        let Some(mut stream) = opened.take() else {
            return Err(self.fault(AcquisitionError::StreamEnded.into()));
        };

        let result = self.cycle(&mut stream, &mut detector, &mut stop).await;
        stream.close().await;

        match result {
            Ok(cycles) => {
                tracing::info!("Detection loop stopped after {} cycles", cycles);
                self.set_state(LoopState::Stopped);
                Ok(LoopSummary {
                    cycles,
                    state: LoopState::Stopped,
                })
            }
            Err(e) => Err(self.fault(e)),
        }
    }

    async fn cycle<D: Detector>(
        &mut self,
        stream: &mut StreamHandle,
        detector: &mut D,
        stop: &mut StopSignal,
    ) -> Result<u64, LoopError> {
        let (width, height) = stream.ready().await?;
        if self.surface.dimensions() != (width, height) {
            self.surface.resize(width, height);
        }

        self.set_state(LoopState::Running);
        tracing::info!(
            "Detection loop running, refresh every {:.1}ms",
            self.refresh.as_secs_f64() * 1000.0
        );

        let mut refresh = tokio::time::interval(self.refresh);
        // A slow detection skips the refreshes it missed instead of bursting
        refresh.set_missed_tick_behavior(MissedTickBehavior::Skip);
        refresh.tick().await;

        let mut stats = LoopStats::default();

        loop {
            let frame = stream.current_frame()?;
            stats.record_frame(frame.sequence());

            let frame_size = frame.dimensions();
            if self.surface.dimensions() != frame_size {
                tracing::info!(
                    "Frame geometry changed to {}x{}, resizing overlay",
                    frame_size.0,
                    frame_size.1
                );
                self.surface.resize(frame_size.0, frame_size.1);
            }

            let detect_start = Instant::now();
            let predictions = detector.detect(&frame).await?;
            let detect_time = detect_start.elapsed();

            let draw_start = Instant::now();
            let detections = Detections {
                frame_size,
                predictions,
            };
            self.renderer.draw(&mut self.surface, &detections);
            let draw_time = draw_start.elapsed();

            let present_start = Instant::now();
            self.sink
                .present(&frame, &self.surface)
                .map_err(LoopError::Output)?;
            let present_time = present_start.elapsed();

            stats.record_cycle(detect_time, draw_time, present_time);
            stats.log_if_due();

            if stop.is_set() {
                break;
            }
            tokio::select! {
                biased;
                _ = stop.stopped() => break,
                _ = refresh.tick() => {}
            }
        }

        Ok(stats.cycles())
    }

    fn set_state(&self, state: LoopState) {
        let previous = self.state.send_replace(state);
        tracing::debug!("Loop state {} -> {}", previous, state);
    }

    fn fault(&mut self, error: LoopError) -> LoopError {
        self.set_state(LoopState::Faulted);
        self.errors.report(&error);
        error
    }
}

/// Handle to a loop spawned with `DetectionLoop::start`
pub struct LoopHandle {
    trigger: StopTrigger,
    state: watch::Receiver<LoopState>,
    task: JoinHandle<Result<LoopSummary, LoopError>>,
}

impl LoopHandle {
    pub fn state(&self) -> LoopState {
        *self.state.borrow()
    }

    /// Trigger that can stop the loop from elsewhere
    pub fn stopper(&self) -> StopTrigger {
        self.trigger.clone()
    }

    /// Prevent the next cycle from being scheduled
    pub fn stop(&self) {
        self.trigger.stop();
    }

    /// Wait for the loop to finish
    pub async fn join(self) -> Result<LoopSummary, LoopError> {
        self.task
            .await
            .map_err(|e| LoopError::Task(e.to_string()))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::{frame_channel, lingering_worker, Frame};
    use crate::detection::Prediction;
    use crate::output::NullSink;
    use crate::overlay::RecordingSurface;
    use image::RgbImage;
    use std::sync::atomic::Ordering;

    struct Idle;

    impl Detector for Idle {
        async fn detect(&mut self, _frame: &Frame) -> Result<Vec<Prediction>, DetectionError> {
            Ok(Vec::new())
        }
    }

    #[tokio::test]
    async fn setup_failure_waits_for_the_camera_to_release() {
        let (worker, released) = lingering_worker(Duration::from_millis(100));
        let (mut publisher, stream) = frame_channel();
        publisher.publish(RgbImage::new(64, 48));
        let stream = stream.with_worker(worker);

        let model = async {
            tokio::time::sleep(Duration::from_millis(10)).await;
            Err::<Idle, _>(LoadError::NetworkOrAssetFailure {
                model: "coco-ssd".into(),
                reason: "connection reset".into(),
            })
        };
        let (_trigger, signal) = stop_signal();

        let result = DetectionLoop::new(RecordingSurface::new(1, 1), NullSink)
            .run(async { Ok::<_, AcquisitionError>(stream) }, model, signal)
            .await;

        assert!(matches!(result, Err(LoopError::Load(_))));
        assert!(released.load(Ordering::Acquire));
    }

    #[tokio::test]
    async fn stop_during_setup_waits_for_the_camera_to_release() {
        let (worker, released) = lingering_worker(Duration::from_millis(100));
        let (_publisher, stream) = frame_channel();
        let stream = stream.with_worker(worker);

        let (trigger, signal) = stop_signal();
        let stop_soon = async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            trigger.stop();
            Ok::<_, LoopError>(())
        };
        let detection_loop = DetectionLoop::new(RecordingSurface::new(1, 1), NullSink).run(
            async { Ok::<_, AcquisitionError>(stream) },
            std::future::pending::<Result<Idle, LoadError>>(),
            signal,
        );

        let (summary, ()) = tokio::try_join!(detection_loop, stop_soon).unwrap();
        assert_eq!(summary.state, LoopState::Stopped);
        assert!(released.load(Ordering::Acquire));
    }

    #[tokio::test]
    async fn stop_signal_resolves_after_trigger() {
        let (trigger, mut signal) = stop_signal();
        assert!(!signal.is_set());

        trigger.stop();
        drop(trigger);
        signal.stopped().await;
        assert!(signal.is_set());
    }

    #[test]
    fn closures_are_error_sinks() {
        let mut reported = Vec::new();
        {
            let mut sink = |e: &LoopError| reported.push(e.to_string());
            sink.report(&LoopError::Acquisition(AcquisitionError::NoDevice));
        }
        assert_eq!(reported, ["video source failed: no camera device available"]);
    }

    #[test]
    fn states_display_in_words() {
        assert_eq!(LoopState::AwaitingSources.to_string(), "awaiting sources");
    }
}
