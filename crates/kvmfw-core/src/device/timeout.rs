//! Per-call time bound for an EEPROM device.
//!
//! Device calls are blocking and may stall indefinitely on a wedged
//! bridge. `TimeoutDevice` forwards every call to a dedicated I/O thread
//! and gives up waiting after a fixed interval. The stalled call is
//! abandoned, not interrupted: the I/O thread exits once it returns.
//! [`TimeoutDevice::shutdown`] hands back that thread so the owner can
//! keep the device reserved until it does.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::warn;

use super::traits::{DeviceError, EepromDevice};

enum Request {
    Write {
        address: u16,
        payload: Vec<u8>,
        reply: Sender<Result<(), DeviceError>>,
    },
    Stream {
        start: u16,
        data: Vec<u8>,
        reply: Sender<StreamMsg>,
    },
    Read {
        address: u16,
        len: usize,
        reply: Sender<Result<Vec<u8>, DeviceError>>,
    },
}

enum StreamMsg {
    Progress(f64),
    Done(Result<(), DeviceError>),
}

/// Device adapter bounding each call by `timeout`.
pub struct TimeoutDevice {
    requests: Sender<Request>,
    timeout: Duration,
    worker: JoinHandle<()>,
    abandoned: AtomicBool,
}

impl TimeoutDevice {
    pub fn new<D: EepromDevice + 'static>(
        device: Arc<D>,
        timeout: Duration,
    ) -> Result<Self, DeviceError> {
        let (requests, rx) = mpsc::channel();
        let worker = thread::Builder::new()
            .name("eeprom-io".into())
            .spawn(move || serve(device.as_ref(), rx))?;
        Ok(Self {
            requests,
            timeout,
            worker,
            abandoned: AtomicBool::new(false),
        })
    }

    /// Whether a call timed out and may still be running on the device.
    pub fn has_abandoned_call(&self) -> bool {
        self.abandoned.load(Ordering::SeqCst)
    }

    /// Stop accepting calls.
    ///
    /// With no abandoned call the I/O thread is idle and is joined here.
    /// Otherwise its handle is returned; it finishes once the stalled call
    /// returns, and until then the device must not be used by anyone else.
    pub fn shutdown(self) -> Option<JoinHandle<()>> {
        let Self {
            requests,
            worker,
            abandoned,
            ..
        } = self;
        drop(requests);
        if abandoned.into_inner() {
            Some(worker)
        } else {
            let _ = worker.join();
            None
        }
    }

    fn timeout_error(&self) -> DeviceError {
        DeviceError::Timeout {
            timeout_ms: self.timeout.as_millis() as u64,
        }
    }

    fn wait<T>(&self, reply: &Receiver<T>) -> Result<T, DeviceError> {
        reply.recv_timeout(self.timeout).map_err(|e| match e {
            RecvTimeoutError::Timeout => {
                self.abandoned.store(true, Ordering::SeqCst);
                warn!(timeout_ms = self.timeout.as_millis() as u64, "Device call timed out");
                self.timeout_error()
            }
            RecvTimeoutError::Disconnected => DeviceError::Disconnected,
        })
    }

    fn submit(&self, request: Request) -> Result<(), DeviceError> {
        self.requests
            .send(request)
            .map_err(|_| DeviceError::Disconnected)
    }
}

fn serve<D: EepromDevice + ?Sized>(device: &D, rx: Receiver<Request>) {
    for request in rx {
        match request {
            Request::Write {
                address,
                payload,
                reply,
            } => {
                let _ = reply.send(device.write_eeprom(address, &payload));
            }
            Request::Stream { start, data, reply } => {
                let progress = reply.clone();
                let result = device.write_eeprom_streaming(start, &data, &mut |p| {
                    let _ = progress.send(StreamMsg::Progress(p));
                });
                let _ = reply.send(StreamMsg::Done(result));
            }
            Request::Read {
                address,
                len,
                reply,
            } => {
                let _ = reply.send(device.read_eeprom(address, len));
            }
        }
    }
}

impl EepromDevice for TimeoutDevice {
    fn write_eeprom(&self, address: u16, payload: &[u8]) -> Result<(), DeviceError> {
        let (reply, rx) = mpsc::channel();
        self.submit(Request::Write {
            address,
            payload: payload.to_vec(),
            reply,
        })?;
        self.wait(&rx)?
    }

    /// The bound applies between consecutive progress reports.
    fn write_eeprom_streaming(
        &self,
        start: u16,
        data: &[u8],
        on_progress: &mut dyn FnMut(f64),
    ) -> Result<(), DeviceError> {
        let (reply, rx) = mpsc::channel();
        self.submit(Request::Stream {
            start,
            data: data.to_vec(),
            reply,
        })?;
        loop {
            match self.wait(&rx)? {
                StreamMsg::Progress(p) => on_progress(p),
                StreamMsg::Done(result) => return result,
            }
        }
    }

    fn read_eeprom(&self, address: u16, len: usize) -> Result<Vec<u8>, DeviceError> {
        let (reply, rx) = mpsc::channel();
        self.submit(Request::Read {
            address,
            len,
            reply,
        })?;
        self.wait(&rx)?
    }
}
