use super::{
    frame_channel, AcquisitionError, CaptureWorker, Constraints, FacingMode, FramePublisher,
    StreamHandle,
};
use image::{imageops, RgbImage};
use nokhwa::pixel_format::RgbFormat;
use nokhwa::utils::{ApiBackend, CameraIndex, CameraInfo, RequestedFormat, RequestedFormatType};
use nokhwa::{Camera, NokhwaError};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::oneshot;

const USER_FACING_HINTS: &[&str] = &["front", "user", "facetime", "integrated", "webcam"];
const ENVIRONMENT_FACING_HINTS: &[&str] = &["back", "rear", "environment", "world"];

/// Open a webcam matching `constraints` and start streaming frames.
///
/// The camera lives on its own thread for its whole lifetime. This resolves
/// once the device is open and streaming; the returned handle becomes ready
/// when the first frame arrives.
pub async fn open_camera(
    constraints: Constraints,
    fallback_index: u32,
) -> Result<StreamHandle, AcquisitionError> {
    let (ready_tx, ready_rx) = oneshot::channel();
    let (publisher, handle) = frame_channel();
    let stop = Arc::new(AtomicBool::new(false));

    let thread = std::thread::Builder::new()
        .name("capture".into())
        .spawn({
            let stop = Arc::clone(&stop);
            move || capture_thread(constraints, fallback_index, publisher, stop, ready_tx)
        })
        .map_err(|e| AcquisitionError::Backend(format!("failed to spawn capture thread: {e}")))?;

    let worker = CaptureWorker::new(stop, thread);

    match ready_rx.await {
        Ok(Ok(())) => Ok(handle.with_worker(worker)),
        Ok(Err(e)) => Err(e),
        Err(_) => Err(AcquisitionError::Backend(
            "capture thread exited during setup".into(),
        )),
    }
}

fn capture_thread(
    constraints: Constraints,
    fallback_index: u32,
    mut publisher: FramePublisher,
    stop: Arc<AtomicBool>,
    ready_tx: oneshot::Sender<Result<(), AcquisitionError>>,
) {
    let mut camera = match open_device(&constraints, fallback_index) {
        Ok(camera) => camera,
        Err(e) => {
            let _ = ready_tx.send(Err(e));
            return;
        }
    };

    if ready_tx.send(Ok(())).is_err() {
        tracing::debug!("Camera opened after the caller went away");
        return;
    }

    while !stop.load(Ordering::Acquire) && !publisher.is_closed() {
        let decoded = camera
            .frame()
            .and_then(|buffer| buffer.decode_image::<RgbFormat>());

        match decoded {
            Ok(image) => {
                let image = match constraints.display_size {
                    Some((width, height)) if image.dimensions() != (width, height) => {
                        scale_to_display(&image, width, height)
                    }
                    _ => image,
                };
                publisher.publish(image);
            }
            Err(e) => {
                tracing::warn!("Failed to capture frame, ending stream: {}", e);
                break;
            }
        }
    }

    if let Err(e) = camera.stop_stream() {
        tracing::warn!("Failed to stop camera stream: {}", e);
    }
    tracing::info!("Camera released");
}

fn open_device(constraints: &Constraints, fallback_index: u32) -> Result<Camera, AcquisitionError> {
    let devices = nokhwa::query(ApiBackend::Auto).map_err(classify)?;
    if devices.is_empty() {
        return Err(AcquisitionError::NoDevice);
    }

    let index = select_device(&devices, constraints.facing_mode).unwrap_or_else(|| {
        tracing::debug!(
            "No device matches {:?}, using index {}",
            constraints.facing_mode,
            fallback_index
        );
        CameraIndex::Index(fallback_index)
    });

    tracing::info!("Opening camera {} ({:?})", index, constraints.facing_mode);

    let requested =
        RequestedFormat::new::<RgbFormat>(RequestedFormatType::AbsoluteHighestResolution);
    let mut camera = Camera::new(index, requested).map_err(classify)?;
    camera.open_stream().map_err(classify)?;

    let resolution = camera.resolution();
    tracing::info!(
        "Camera streaming at {}x{}",
        resolution.width(),
        resolution.height()
    );

    Ok(camera)
}

/// Pick the first device whose name or description hints at the facing mode
fn select_device(devices: &[CameraInfo], facing_mode: FacingMode) -> Option<CameraIndex> {
    let hints = match facing_mode {
        FacingMode::User => USER_FACING_HINTS,
        FacingMode::Environment => ENVIRONMENT_FACING_HINTS,
    };

    devices
        .iter()
        .find(|info| {
            let text = format!("{} {}", info.human_name(), info.description()).to_lowercase();
            hints.iter().any(|hint| text.contains(hint))
        })
        .map(|info| info.index().clone())
}

fn classify(err: NokhwaError) -> AcquisitionError {
    let message = err.to_string();
    classify_message(&message).unwrap_or(AcquisitionError::Backend(message))
}

fn classify_message(message: &str) -> Option<AcquisitionError> {
    let lower = message.to_lowercase();
    if lower.contains("permission") || lower.contains("denied") || lower.contains("not authorized")
    {
        Some(AcquisitionError::PermissionDenied)
    } else if lower.contains("busy") {
        Some(AcquisitionError::DeviceBusy)
    } else if lower.contains("no such") || lower.contains("not found") {
        Some(AcquisitionError::NoDevice)
    } else {
        None
    }
}

fn scale_to_display(image: &RgbImage, width: u32, height: u32) -> RgbImage {
    imageops::resize(image, width, height, imageops::FilterType::Triangle)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn device(name: &str, index: u32) -> CameraInfo {
        CameraInfo::new(name, "", "", CameraIndex::Index(index))
    }

    #[test]
    fn selects_device_by_facing_hint() {
        let devices = [device("Rear Camera", 0), device("Integrated Webcam", 1)];

        assert_eq!(
            select_device(&devices, FacingMode::User),
            Some(CameraIndex::Index(1))
        );
        assert_eq!(
            select_device(&devices, FacingMode::Environment),
            Some(CameraIndex::Index(0))
        );
    }

    #[test]
    fn unmatched_devices_fall_through() {
        let devices = [device("USB Video Device", 0)];
        assert_eq!(select_device(&devices, FacingMode::Environment), None);
    }

    #[test]
    fn classifies_os_errors() {
        assert_eq!(
            classify_message("Could not open device: Permission denied (os error 13)"),
            Some(AcquisitionError::PermissionDenied)
        );
        assert_eq!(
            classify_message("Device or resource busy (os error 16)"),
            Some(AcquisitionError::DeviceBusy)
        );
        assert_eq!(
            classify_message("/dev/video3: No such file or directory (os error 2)"),
            Some(AcquisitionError::NoDevice)
        );
        assert_eq!(classify_message("unsupported pixel format"), None);
    }

    #[test]
    fn scales_frames_to_display_geometry() {
        let scaled = scale_to_display(&RgbImage::new(1280, 720), 600, 500);
        assert_eq!(scaled.dimensions(), (600, 500));
    }
}
