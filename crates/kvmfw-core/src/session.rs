//! Update session - high-level orchestrator for one firmware update.
//!
//! A session owns the lifecycle `Idle -> Downloading -> Writing ->
//! Completed | Failed`. Each run executes on its own background thread;
//! a `start` is ignored until the previous run has emitted its final event
//! and the device has returned from any call abandoned by a timeout.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};

use tracing::{debug, info, instrument, warn};

use crate::cancel::CancelToken;
use crate::config::UpdateConfig;
use crate::device::{EepromDevice, TimeoutDevice};
use crate::error::UpdateError;
use crate::events::{TracingObserver, UpdateEvent, UpdateObserver, UpdateState};
use crate::firmware::FirmwareImage;
use crate::net::HttpFetch;
use crate::resolver::ImageResolver;
use crate::writer::ChunkWriter;

/// Point-in-time view of a session.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionSnapshot {
    pub state: UpdateState,
    /// Merged progress in `0.0..=1.0`.
    pub progress: f64,
    /// Last status message.
    pub message: String,
    pub last_error: Option<UpdateError>,
    /// Build being installed, once resolved.
    pub build_id: Option<String>,
    /// The failed run may have left the EEPROM partially written.
    pub device_touched: bool,
}

impl Default for SessionSnapshot {
    fn default() -> Self {
        Self {
            state: UpdateState::Idle,
            progress: 0.0,
            message: String::new(),
            last_error: None,
            build_id: None,
            device_touched: false,
        }
    }
}

#[derive(Default)]
struct Status {
    snapshot: SessionSnapshot,
    /// Last percent published in this run.
    last_percent: Option<u8>,
    /// Set by `start`, cleared once the run thread has emitted its last event.
    running: bool,
    /// I/O thread still inside a device call that timed out.
    stalled_io: Option<JoinHandle<()>>,
}

/// Releases the session when a run thread ends, however it ends.
struct RunGuard<'a>(&'a Mutex<Status>);

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.0
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .running = false;
    }
}

struct Inner<F, D, O> {
    config: UpdateConfig,
    resolver: ImageResolver<F>,
    writer: ChunkWriter,
    device: Arc<D>,
    observer: O,
    status: Mutex<Status>,
}

/// Handle to an in-flight run.
pub struct RunHandle {
    cancel: CancelToken,
    thread: JoinHandle<Result<(), UpdateError>>,
}

impl RunHandle {
    /// Request cancellation; honoured at the next fetch or device write.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    pub fn is_finished(&self) -> bool {
        self.thread.is_finished()
    }

    /// Wait for the run to reach a terminal state.
    pub fn join(self) -> Result<(), UpdateError> {
        self.thread
            .join()
            .unwrap_or_else(|_| Err(UpdateError::WriteFailed("update thread panicked".into())))
    }
}

/// Update session - resolves, downloads and flashes the latest firmware.
pub struct UpdateSession<F, D, O> {
    inner: Arc<Inner<F, D, O>>,
}

impl<F, D> UpdateSession<F, D, TracingObserver>
where
    F: HttpFetch + 'static,
    D: EepromDevice + 'static,
{
    /// Create a new session with default tracing observer.
    pub fn new(config: UpdateConfig, fetcher: F, device: Arc<D>) -> Result<Self, UpdateError> {
        Self::with_observer(config, fetcher, device, TracingObserver)
    }
}

impl<F, D, O> UpdateSession<F, D, O>
where
    F: HttpFetch + 'static,
    D: EepromDevice + 'static,
    O: UpdateObserver + 'static,
{
    /// Create a new session with a custom observer.
    pub fn with_observer(
        config: UpdateConfig,
        fetcher: F,
        device: Arc<D>,
        observer: O,
    ) -> Result<Self, UpdateError> {
        config.validate()?;
        let resolver = ImageResolver::new(fetcher, config.base_url()?, config.descriptor_name.clone());
        let writer = ChunkWriter::from_config(&config)?;

        Ok(Self {
            inner: Arc::new(Inner {
                config,
                resolver,
                writer,
                device,
                observer,
                status: Mutex::new(Status::default()),
            }),
        })
    }

    pub fn config(&self) -> &UpdateConfig {
        &self.inner.config
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.inner.status.lock().unwrap().snapshot.clone()
    }

    pub fn state(&self) -> UpdateState {
        self.inner.status.lock().unwrap().snapshot.state
    }

    /// Begin a run on a background thread.
    ///
    /// Returns `None`, changing nothing, while a previous run is still in
    /// progress or the device is still busy with a call that timed out.
    /// A terminal state is acknowledged implicitly.
    pub fn start(&self) -> Option<RunHandle> {
        let previous = {
            let mut status = self.inner.status.lock().unwrap();
            if status.running {
                debug!(state = %status.snapshot.state, "Update already in progress, start ignored");
                return None;
            }
            if let Some(io) = status.stalled_io.take() {
                if !io.is_finished() {
                    debug!("Device still busy with a timed-out call, start ignored");
                    status.stalled_io = Some(io);
                    return None;
                }
                let _ = io.join();
            }
            let previous = status.snapshot.state;
            status.snapshot = SessionSnapshot {
                state: UpdateState::Downloading,
                ..Default::default()
            };
            status.last_percent = None;
            status.running = true;
            previous
        };

        let cancel = CancelToken::new();
        let token = cancel.clone();
        let inner = Arc::clone(&self.inner);
        let thread = thread::spawn(move || {
            let _guard = RunGuard(&inner.status);
            inner.execute(previous, &token)
        });

        Some(RunHandle { cancel, thread })
    }

    /// Run to completion on the calling thread's behalf.
    pub fn run(&self) -> Result<(), UpdateError> {
        self.start().ok_or(UpdateError::Busy)?.join()
    }

    /// Return a terminal session to `Idle`. No-op otherwise.
    pub fn acknowledge(&self) -> bool {
        let from = {
            let mut status = self.inner.status.lock().unwrap();
            let from = status.snapshot.state;
            if status.running || !from.is_terminal() {
                return false;
            }
            status.snapshot.state = UpdateState::Idle;
            from
        };
        self.inner.emit(UpdateEvent::StateChanged {
            from,
            to: UpdateState::Idle,
        });
        true
    }
}

impl<F, D, O> Inner<F, D, O>
where
    F: HttpFetch,
    D: EepromDevice + 'static,
    O: UpdateObserver,
{
    fn emit(&self, event: UpdateEvent) {
        self.observer.on_event(&event);
    }

    fn set_status(&self, message: impl Into<String>) {
        let message = message.into();
        self.status.lock().unwrap().snapshot.message = message.clone();
        self.emit(UpdateEvent::Status { message });
    }

    fn transition(&self, to: UpdateState) {
        let from = {
            let mut status = self.status.lock().unwrap();
            let from = status.snapshot.state;
            status.snapshot.state = to;
            from
        };
        if from != to {
            info!(from = %from, to = %to, "State transition");
        }
        self.emit(UpdateEvent::StateChanged { from, to });
    }

    /// Raise merged progress to `fraction`; never lowers it.
    fn set_progress(&self, fraction: f64) {
        let publish = {
            let mut status = self.status.lock().unwrap();
            let fraction = fraction.clamp(0.0, 1.0).max(status.snapshot.progress);
            status.snapshot.progress = fraction;

            let percent = (fraction * 100.0).floor() as u8;
            if status.last_percent.is_none_or(|last| percent > last) {
                status.last_percent = Some(percent);
                Some((percent, fraction))
            } else {
                None
            }
        };
        if let Some((percent, fraction)) = publish {
            self.emit(UpdateEvent::Progress { percent, fraction });
        }
    }

    /// Timeout wrapper for this run's device calls, if a write timeout is set.
    fn bounded_device(&self) -> Result<Option<TimeoutDevice>, UpdateError> {
        self.config
            .write_timeout()
            .map(|timeout| TimeoutDevice::new(Arc::clone(&self.device), timeout))
            .transpose()
            .map_err(|e| UpdateError::WriteFailed(e.to_string()))
    }

    #[instrument(skip_all)]
    fn execute(&self, previous: UpdateState, cancel: &CancelToken) -> Result<(), UpdateError> {
        let result = panic::catch_unwind(AssertUnwindSafe(|| {
            if previous.is_terminal() {
                self.emit(UpdateEvent::StateChanged {
                    from: previous,
                    to: UpdateState::Idle,
                });
            }
            self.emit(UpdateEvent::StateChanged {
                from: UpdateState::Idle,
                to: UpdateState::Downloading,
            });
            self.set_progress(0.0);
            self.perform(cancel)
        }))
        .unwrap_or_else(|payload| {
            Err(UpdateError::WriteFailed(format!(
                "update thread panicked: {}",
                panic_message(&*payload)
            )))
        });

        match &result {
            Ok(()) => self.complete(),
            Err(e) => self.fail(e.clone()),
        }
        result
    }

    fn perform(&self, cancel: &CancelToken) -> Result<(), UpdateError> {
        let weight = self.config.download_weight;
        let start = self.config.start_address;

        self.set_status("Checking for the latest firmware...");
        let descriptor = self.resolver.latest_descriptor(cancel)?;
        self.status.lock().unwrap().snapshot.build_id = Some(descriptor.build_id.clone());

        self.set_status(format!("Downloading {}...", descriptor));
        let (_, image) = self.resolver.download(&descriptor, cancel)?;
        self.set_progress(weight);

        self.transition(UpdateState::Writing);
        self.set_status(format!(
            "Writing {} bytes to EEPROM at 0x{:04X}...",
            image.len(),
            start
        ));

        let bounded = self.bounded_device()?;
        let device: &dyn EepromDevice = match &bounded {
            Some(device) => device,
            None => &*self.device,
        };
        let result = self.write_image(&image, device, cancel);

        if let Some(io) = bounded.and_then(TimeoutDevice::shutdown) {
            warn!("Device call still pending after timeout, holding the device until it returns");
            self.status.lock().unwrap().stalled_io = Some(io);
        }
        result
    }

    fn write_image(
        &self,
        image: &FirmwareImage,
        device: &dyn EepromDevice,
        cancel: &CancelToken,
    ) -> Result<(), UpdateError> {
        let weight = self.config.download_weight;
        let start = self.config.start_address;

        self.writer.write(image, start, device, cancel, |fraction| {
            self.set_progress(weight + fraction * (1.0 - weight));
        })?;

        if self.config.verify {
            self.set_status("Verifying EEPROM contents...");
            self.writer.verify(image, start, device, cancel)?;
        }

        Ok(())
    }

    fn complete(&self) {
        self.set_progress(1.0);
        self.transition(UpdateState::Completed);
        self.set_status("Firmware update complete");
        self.emit(UpdateEvent::Completed {
            success: true,
            error: None,
        });
    }

    fn fail(&self, error: UpdateError) {
        let message = error.to_string();
        let device_touched = {
            let mut status = self.status.lock().unwrap();
            let touched = error.device_touched(status.snapshot.state);
            status.snapshot.device_touched = touched;
            status.snapshot.last_error = Some(error);
            touched
        };
        warn!(error = %message, device_touched, "Firmware update failed");
        self.transition(UpdateState::Failed);
        self.set_status(message.clone());
        self.emit(UpdateEvent::Completed {
            success: false,
            error: Some(message),
        });
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
