//! Periodic frame acquisition on a dedicated worker thread.
//!
//! The loop is either Idle or Active. While Active, a worker thread owns
//! the frame source and the recognition processor; every tick it acquires
//! one frame, publishes it, and every Nth acquired frame also runs the
//! processor on it. Events go out over an unbounded channel so the worker
//! never blocks on a slow consumer.

use rollcall_hw::{CameraError, Frame, FrameSource};
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc as handoff, Arc};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::mpsc;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum CaptureError {
    #[error("capture already active")]
    AlreadyActive,
    #[error("camera unavailable: {0}")]
    Camera(#[from] CameraError),
    #[error("recognition pipeline lost by a failed capture worker")]
    ProcessorUnavailable,
    #[error("failed to spawn capture worker: {0}")]
    Spawn(#[source] std::io::Error),
    #[error("capture worker exited before taking the camera")]
    WorkerGone,
}

/// Work done on every Nth frame. Runs on the capture worker, to completion,
/// before the next frame is acquired.
pub trait FrameProcessor: Send + 'static {
    type Output: Send + 'static;

    fn process(&mut self, frame: &Frame) -> Self::Output;
}

/// What the worker reports. The display and recognition events of one tick
/// carry the same frame allocation.
#[derive(Debug)]
pub enum CaptureEvent<T> {
    Frame { tick: u64, frame: Arc<Frame> },
    Recognition { tick: u64, frame: Arc<Frame>, outcome: T },
    FrameDropped { tick: u64, reason: String },
    Stopped { session: Uuid },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoopSettings {
    pub camera_index: u32,
    pub tick_interval: Duration,
    /// Every Nth acquired frame goes to the processor. Zero is read as one.
    pub recognition_interval: u32,
}

impl Default for LoopSettings {
    fn default() -> Self {
        Self {
            camera_index: 0,
            tick_interval: Duration::from_millis(33),
            recognition_interval: 15,
        }
    }
}

/// Opens a frame source by logical camera index.
pub type SourceOpener = Box<dyn Fn(u32) -> Result<Box<dyn FrameSource>, CameraError> + Send>;

struct ActiveSession<P> {
    id: Uuid,
    running: Arc<AtomicBool>,
    worker: JoinHandle<Option<(Box<dyn FrameSource>, P)>>,
}

pub struct CaptureLoop<P: FrameProcessor> {
    settings: LoopSettings,
    opener: SourceOpener,
    processor: Option<P>,
    events: mpsc::UnboundedSender<CaptureEvent<P::Output>>,
    active: Option<ActiveSession<P>>,
}

impl<P: FrameProcessor> CaptureLoop<P> {
    /// Create an Idle loop and the receiving end of its event channel.
    pub fn new(
        settings: LoopSettings,
        opener: SourceOpener,
        processor: P,
    ) -> (Self, mpsc::UnboundedReceiver<CaptureEvent<P::Output>>) {
        let (events, rx) = mpsc::unbounded_channel();
        let capture = Self {
            settings,
            opener,
            processor: Some(processor),
            events,
            active: None,
        };
        (capture, rx)
    }

    pub fn settings(&self) -> &LoopSettings {
        &self.settings
    }

    /// True while a worker is ticking. A worker that died counts as Idle.
    pub fn is_active(&self) -> bool {
        self.active.as_ref().is_some_and(|s| !s.worker.is_finished())
    }

    /// Id of the running capture session, if any.
    pub fn session(&self) -> Option<Uuid> {
        self.active
            .as_ref()
            .filter(|s| !s.worker.is_finished())
            .map(|s| s.id)
    }

    /// Open the camera and start ticking. On failure the loop stays Idle.
    pub fn start(&mut self) -> Result<Uuid, CaptureError> {
        if self.is_active() {
            return Err(CaptureError::AlreadyActive);
        }
        // Reap a worker that exited on its own.
        self.stop();
        let processor = self.processor.take().ok_or(CaptureError::ProcessorUnavailable)?;

        let source = match (self.opener)(self.settings.camera_index) {
            Ok(source) => source,
            Err(e) => {
                self.processor = Some(processor);
                tracing::warn!(camera_index = self.settings.camera_index, error = %e, "capture start failed");
                return Err(e.into());
            }
        };

        let id = Uuid::new_v4();
        let running = Arc::new(AtomicBool::new(true));
        let worker = Worker {
            session: id,
            settings: self.settings,
            running: running.clone(),
            events: self.events.clone(),
        };

        // The camera and processor cross to the worker only once it exists,
        // so a failed spawn leaves both here.
        let (give, take) = handoff::sync_channel::<(Box<dyn FrameSource>, P)>(1);
        let spawned = std::thread::Builder::new()
            .name("rollcall-capture".into())
            .spawn(move || {
                let (source, processor) = take.recv().ok()?;
                Some(worker.run(source, processor))
            });
        let handle = match spawned {
            Ok(handle) => handle,
            Err(e) => {
                self.processor = Some(processor);
                tracing::error!(error = %e, "capture worker spawn failed");
                return Err(CaptureError::Spawn(e));
            }
        };
        let describe = source.describe();
        if let Err(handoff::SendError((_source, processor))) = give.send((source, processor)) {
            self.processor = Some(processor);
            let _ = handle.join();
            return Err(CaptureError::WorkerGone);
        }
        tracing::info!(session = %id, source = %describe, "capture started");

        self.active = Some(ActiveSession {
            id,
            running,
            worker: handle,
        });
        Ok(id)
    }

    /// Stop ticking, wait for the worker, then release the camera.
    /// Returns false if the loop was already Idle.
    pub fn stop(&mut self) -> bool {
        let Some(session) = self.active.take() else {
            return false;
        };

        session.running.store(false, Ordering::Release);
        match session.worker.join() {
            Ok(Some((source, processor))) => {
                self.processor = Some(processor);
                drop(source);
                tracing::info!(session = %session.id, "capture stopped");
            }
            Ok(None) => {
                tracing::warn!(session = %session.id, "capture worker never received the camera");
            }
            Err(_) => {
                tracing::error!(session = %session.id, "capture worker panicked; pipeline lost");
                let _ = self.events.send(CaptureEvent::Stopped { session: session.id });
            }
        }
        true
    }
}

impl<P: FrameProcessor> Drop for CaptureLoop<P> {
    fn drop(&mut self) {
        self.stop();
    }
}

struct Worker<T> {
    session: Uuid,
    settings: LoopSettings,
    running: Arc<AtomicBool>,
    events: mpsc::UnboundedSender<CaptureEvent<T>>,
}

impl<T: Send + 'static> Worker<T> {
    fn run<P>(self, mut source: Box<dyn FrameSource>, mut processor: P) -> (Box<dyn FrameSource>, P)
    where
        P: FrameProcessor<Output = T>,
    {
        let span = tracing::info_span!("capture", session = %self.session);
        let _enter = span.enter();

        let every = u64::from(self.settings.recognition_interval.max(1));
        let mut tick: u64 = 0;
        let mut acquired: u64 = 0;
        let mut deadline = Instant::now();

        while self.running.load(Ordering::Acquire) {
            tick += 1;
            match source.next_frame() {
                Ok(frame) => {
                    acquired += 1;
                    let frame = Arc::new(frame);
                    self.emit(CaptureEvent::Frame {
                        tick,
                        frame: frame.clone(),
                    });

                    if acquired % every == 0 {
                        match panic::catch_unwind(AssertUnwindSafe(|| processor.process(&frame))) {
                            Ok(outcome) => self.emit(CaptureEvent::Recognition {
                                tick,
                                frame,
                                outcome,
                            }),
                            Err(payload) => {
                                let reason = panic_message(payload.as_ref());
                                tracing::error!(tick, reason = %reason, "recognition panicked; frame dropped");
                                self.emit(CaptureEvent::FrameDropped {
                                    tick,
                                    reason: format!("recognition panicked: {reason}"),
                                });
                            }
                        }
                    }
                }
                Err(e) => {
                    tracing::warn!(tick, error = %e, "frame acquisition failed; skipping tick");
                    self.emit(CaptureEvent::FrameDropped {
                        tick,
                        reason: e.to_string(),
                    });
                }
            }

            // Fixed-rate schedule; a late tick does not cause a burst.
            deadline += self.settings.tick_interval;
            let now = Instant::now();
            if deadline > now {
                std::thread::sleep(deadline - now);
            } else {
                deadline = now;
            }
        }

        tracing::debug!(ticks = tick, acquired, "capture worker exiting");
        self.emit(CaptureEvent::Stopped {
            session: self.session,
        });
        (source, processor)
    }

    fn emit(&self, event: CaptureEvent<T>) {
        // A closed receiver only means nobody is listening any more.
        let _ = self.events.send(event);
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
