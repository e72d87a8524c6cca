//! The repaint loop
//!
//! An [`Adapter`] owns the device, the renderer and all outputs. Every iteration it renders
//! the outputs that are due, submits them in one combined commit and then waits on the
//! device descriptor until the kernel reports the commits as completed.

use std::io;
use std::os::unix::io::AsFd;
use std::time::{Duration, Instant};

use calloop::generic::Generic;
use calloop::signals::{Signal, Signals};
use calloop::timer::{TimeoutAction, Timer};
use calloop::{EventLoop, Interest, Mode, PostAction};
use drm::control::crtc;
use tracing::{debug, error, info, info_span, instrument, trace, warn};

use super::atomic::AtomicRequestBuilder;
use super::device::{CompletionEvent, KmsDevice};
use super::error::{CommitError, Error};
use super::frame_clock::{DEFAULT_DRIFT_TOLERANCE, DEFAULT_MARGIN};
use super::output::Output;
use crate::backend::allocator::MIN_RING_DEPTH;
use crate::backend::renderer::Renderer;
use crate::utils::{Clock, Monotonic, Time};

/// Upper bound for waiting on in-flight commits once the loop stopped
pub const DRAIN_TIMEOUT: Duration = Duration::from_secs(1);

/// Tunables of the repaint pipeline
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdapterConfig {
    /// Buffers per output, at least three
    pub ring_depth: usize,
    /// Time a frame has to be ready before its predicted completion
    pub margin: Duration,
    /// Deviation between predicted and actual completion worth reporting
    pub drift_tolerance: Duration,
    /// Number of frames after which the animation repeats
    pub animation_period: u64,
    /// Use explicit fences where kernel and renderer support them
    pub explicit_fencing: bool,
}

impl Default for AdapterConfig {
    fn default() -> Self {
        AdapterConfig {
            ring_depth: MIN_RING_DEPTH,
            margin: DEFAULT_MARGIN,
            drift_tolerance: DEFAULT_DRIFT_TOLERANCE,
            animation_period: 60,
            explicit_fencing: true,
        }
    }
}

/// Errors of the repaint loop
#[derive(thiserror::Error, Debug)]
pub enum AdapterError {
    /// Device or output setup failed
    #[error(transparent)]
    Drm(#[from] Error),
    /// The kernel rejected a commit
    #[error(transparent)]
    Commit(#[from] CommitError),
    /// Allocating scanout buffers failed
    #[error("Failed to allocate scanout buffers")]
    Allocation(#[source] Box<dyn std::error::Error + Send + Sync>),
    /// The renderer failed to draw a frame
    #[error("Failed to render a frame")]
    Render(#[source] Box<dyn std::error::Error + Send + Sync>),
    /// Reading completion events failed
    #[error("Failed to read events from the device")]
    Events(#[source] io::Error),
    /// The event loop failed
    #[error("Event loop failure")]
    EventLoop(#[from] calloop::Error),
}

/// Owner of the device, the renderer and the outputs, running the repaint loop
#[derive(Debug)]
pub struct Adapter<D, R: Renderer> {
    device: D,
    renderer: R,
    outputs: Vec<Output<R::Image>>,
    clock: Clock<Monotonic>,
    running: bool,
    // outputs of the last rejected commit, waiting to be retried
    held: Vec<crtc::Handle>,
    span: tracing::Span,
}

impl<D, R> Adapter<D, R>
where
    D: KmsDevice,
    R: Renderer,
{
    /// Create an adapter driving `outputs`
    ///
    /// Explicit fencing is enabled per output if the configuration allows it and both
    /// the kernel and the renderer support it.
    pub fn new(
        device: D,
        renderer: R,
        mut outputs: Vec<Output<R::Image>>,
        config: &AdapterConfig,
    ) -> Result<Self, AdapterError> {
        if outputs.is_empty() {
            return Err(Error::NoActiveOutputs.into());
        }
        let span = info_span!("drm_adapter");

        let fencing = config.explicit_fencing && renderer.supports_explicit_fencing();
        if config.explicit_fencing && !fencing {
            info!(parent: &span, "Renderer does not support explicit fencing, using implicit sync");
        }
        for output in &mut outputs {
            output.set_explicit_fencing(fencing);
        }

        Ok(Adapter {
            device,
            renderer,
            outputs,
            clock: Clock::new(),
            running: false,
            held: Vec::new(),
            span,
        })
    }

    /// The device commits are submitted to
    pub fn device(&self) -> &D {
        &self.device
    }

    /// The renderer drawing the frames
    pub fn renderer(&self) -> &R {
        &self.renderer
    }

    /// All outputs
    pub fn outputs(&self) -> &[Output<R::Image>] {
        &self.outputs
    }

    /// Returns whether any output waits for a commit to complete
    pub fn commits_in_flight(&self) -> bool {
        self.outputs.iter().any(|o| o.pending().is_some())
    }

    /// Returns whether any output should be rendered right away
    pub fn repaint_due(&self) -> bool {
        self.outputs.iter().any(Output::needs_repaint)
    }

    /// Crtcs of the outputs whose commit was rejected by the last [`iterate`](Adapter::iterate)
    ///
    /// These outputs are not due until [`retry_output`](Adapter::retry_output) is called.
    pub fn held_outputs(&self) -> &[crtc::Handle] {
        &self.held
    }

    /// Make an output held back after a rejected commit due again
    ///
    /// Returns `false` if no output drives `crtc`.
    pub fn retry_output(&mut self, crtc: crtc::Handle) -> bool {
        let span = &self.span;
        let Some(output) = self.outputs.iter_mut().find(|o| o.crtc() == crtc) else {
            return false;
        };
        trace!(parent: span, ?crtc, "retrying output");
        output.retry();
        true
    }

    /// Request the loop to exit before the next iteration
    pub fn stop(&mut self) {
        self.running = false;
    }

    /// Render all due outputs and submit them in one commit.
    ///
    /// Returns whether a commit was submitted. If the renderer fails, every output
    /// rendered so far gets its buffer back and stays due. On rejection every output
    /// of the commit gets its buffer back and is held until it is retried, see
    /// [`held_outputs`](Adapter::held_outputs).
    #[instrument(level = "trace", parent = &self.span, skip(self))]
    #[profiling::function]
    pub fn iterate(&mut self, now: Time<Monotonic>) -> Result<bool, AdapterError> {
        self.held.clear();

        let mut builder = AtomicRequestBuilder::new();
        let mut allow_modeset = false;
        let mut failed = None;
        for output in self.outputs.iter_mut().filter(|o| o.needs_repaint()) {
            match output.repaint(&mut self.renderer, now, &mut builder) {
                Ok(first) => allow_modeset |= first,
                Err(err) => {
                    error!(crtc = ?output.crtc(), %err, "rendering failed");
                    failed = Some(err);
                    break;
                }
            }
        }
        if let Some(err) = failed {
            let crtcs = builder.outputs();
            for output in self.outputs.iter_mut().filter(|o| crtcs.contains(&o.crtc())) {
                output.cancel_pending();
            }
            return Err(AdapterError::Render(Box::new(err)));
        }
        if builder.is_empty() {
            return Ok(false);
        }

        let crtcs = builder.outputs().to_vec();
        match builder.submit(&self.device, allow_modeset) {
            Ok(mut request) => {
                for output in self.outputs.iter_mut().filter(|o| crtcs.contains(&o.crtc())) {
                    let out_fence = if output.explicit_fencing() {
                        request.take_out_fence(output.crtc())
                    } else {
                        None
                    };
                    output.commit_submitted(out_fence);
                }
                Ok(true)
            }
            Err(err) => {
                for output in self.outputs.iter_mut().filter(|o| crtcs.contains(&o.crtc())) {
                    output.commit_failed();
                }
                self.held = crtcs;
                Err(err.into())
            }
        }
    }

    /// Apply a completion event to the output owning its crtc.
    ///
    /// Events for unknown crtcs are logged and ignored. Returns whether an output
    /// consumed the event.
    #[profiling::function]
    pub fn dispatch(&mut self, event: CompletionEvent) -> bool {
        let Some(output) = self.outputs.iter_mut().find(|o| o.crtc() == event.crtc) else {
            warn!(parent: &self.span, crtc = ?event.crtc, "completion event for unknown crtc");
            return false;
        };
        output.commit_completed(event.time)
    }

    /// Read all pending completion events from the device and dispatch them
    pub fn process_events(&mut self) -> Result<usize, AdapterError> {
        let events = self.device.read_events().map_err(AdapterError::Events)?;
        trace!(parent: &self.span, count = events.len(), "received events");
        let count = events.len();
        for event in events {
            self.dispatch(event);
        }
        Ok(count)
    }
}

impl<D, R> Adapter<D, R>
where
    D: KmsDevice + AsFd,
    R: Renderer,
{
    /// Run the repaint loop until `SIGINT` is received.
    ///
    /// Outputs whose commit was rejected sit out one refresh cycle and are then tried
    /// again. Commits still in flight when the loop stops are allowed to complete before
    /// this returns, also when it stops because of an error.
    pub fn run(&mut self) -> Result<(), AdapterError> {
        let mut event_loop: EventLoop<'_, Self> = EventLoop::try_new()?;
        let handle = event_loop.handle();

        let fd = self
            .device
            .as_fd()
            .try_clone_to_owned()
            .map_err(AdapterError::Events)?;
        handle
            .insert_source(
                Generic::new(fd, Interest::READ, Mode::Level),
                |_, _, adapter: &mut Self| {
                    adapter
                        .process_events()
                        .map_err(|err| io::Error::new(io::ErrorKind::Other, err))?;
                    Ok(PostAction::Continue)
                },
            )
            .map_err(|err| err.error)?;
        handle
            .insert_source(Signals::new(&[Signal::SIGINT])?, |_, _, adapter: &mut Self| {
                info!("Interrupted, stopping");
                adapter.stop();
            })
            .map_err(|err| err.error)?;

        self.running = true;
        let result = self.repaint_loop(&mut event_loop);
        self.running = false;
        if let Err(err) = &result {
            error!(parent: &self.span, %err, "repaint loop failed");
        }

        debug!(parent: &self.span, "draining in-flight commits");
        let deadline = Instant::now() + DRAIN_TIMEOUT;
        while self.commits_in_flight() {
            let Some(left) = deadline.checked_duration_since(Instant::now()) else {
                warn!(parent: &self.span, "commits still in flight after {:?}, giving up", DRAIN_TIMEOUT);
                break;
            };
            if let Err(err) = event_loop.dispatch(Some(left), self) {
                warn!(parent: &self.span, %err, "failed to drain in-flight commits");
                break;
            }
        }
        result
    }

    fn repaint_loop<'l>(&mut self, event_loop: &mut EventLoop<'l, Self>) -> Result<(), AdapterError>
    where
        Self: 'l,
    {
        let handle = event_loop.handle();
        while self.running {
            match self.iterate(self.clock.now()) {
                Ok(_) => {}
                Err(AdapterError::Commit(err)) => {
                    warn!(parent: &self.span, %err, outputs = ?self.held, "commit rejected, retrying next cycle");
                    for crtc in self.held.drain(..) {
                        let Some(output) = self.outputs.iter().find(|o| o.crtc() == crtc) else {
                            continue;
                        };
                        let timer = Timer::from_duration(output.clock().refresh());
                        handle
                            .insert_source(timer, move |_, _, adapter: &mut Self| {
                                adapter.retry_output(crtc);
                                TimeoutAction::Drop
                            })
                            .map_err(|err| err.error)?;
                    }
                }
                Err(err) => return Err(err),
            }

            // Completion events, retry timers and signals wake the loop up otherwise.
            let timeout = if self.repaint_due() {
                Some(Duration::ZERO)
            } else {
                None
            };
            event_loop.dispatch(timeout, self)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::cell::{Cell, RefCell};
    use std::io::{self, Read, Write};
    use std::os::unix::io::{AsFd, BorrowedFd};
    use std::os::unix::net::UnixStream;
    use std::time::Instant;

    use drm::control::AtomicCommitFlags;

    use super::{Adapter, AdapterConfig, AdapterError};
    use crate::backend::allocator::buffer::test::DummyImage;
    use crate::backend::allocator::BufferState;
    use crate::backend::drm::atomic::AtomicRequest;
    use crate::backend::drm::device::{CompletionEvent, KmsDevice};
    use crate::backend::drm::output::tests::{output, properties, TestRenderer, INTERVAL};
    use crate::backend::drm::output::Output;
    use crate::utils::{Clock, Monotonic, Time};

    fn rejected() -> io::Error {
        io::Error::from(rustix::io::Errno::INVAL)
    }

    #[derive(Debug, Default)]
    struct MockDevice {
        commits: RefCell<Vec<(AtomicRequest, AtomicCommitFlags)>>,
        reject: Cell<bool>,
        events: RefCell<Vec<CompletionEvent>>,
    }

    impl KmsDevice for MockDevice {
        fn commit(&self, request: &AtomicRequest, flags: AtomicCommitFlags) -> io::Result<()> {
            if self.reject.get() {
                return Err(rejected());
            }
            let recorded = AtomicRequest::from_writes(request.writes().to_vec());
            self.commits.borrow_mut().push((recorded, flags));
            Ok(())
        }

        fn read_events(&self) -> io::Result<Vec<CompletionEvent>> {
            Ok(self.events.borrow_mut().drain(..).collect())
        }
    }

    /// Device completing every accepted commit at once, readable through a socket pair
    /// so it can drive [`Adapter::run`].
    #[derive(Debug)]
    struct LoopDevice {
        readable: UnixStream,
        wake: UnixStream,
        queued: RefCell<Vec<CompletionEvent>>,
        attempts: Cell<usize>,
        reject: bool,
        interrupt_after: usize,
        clock: Clock<Monotonic>,
    }

    impl LoopDevice {
        fn new(reject: bool, interrupt_after: usize) -> Self {
            let (readable, wake) = UnixStream::pair().unwrap();
            readable.set_nonblocking(true).unwrap();
            LoopDevice {
                readable,
                wake,
                queued: RefCell::new(Vec::new()),
                attempts: Cell::new(0),
                reject,
                interrupt_after,
                clock: Clock::new(),
            }
        }
    }

    impl AsFd for LoopDevice {
        fn as_fd(&self) -> BorrowedFd<'_> {
            self.readable.as_fd()
        }
    }

    impl KmsDevice for LoopDevice {
        fn commit(&self, request: &AtomicRequest, _flags: AtomicCommitFlags) -> io::Result<()> {
            let attempt = self.attempts.get() + 1;
            self.attempts.set(attempt);
            if attempt == self.interrupt_after {
                // SIGINT is blocked on this thread while the loop runs and read from a signalfd
                unsafe { libc::pthread_kill(libc::pthread_self(), libc::SIGINT) };
            }
            if self.reject {
                return Err(rejected());
            }

            let connector_crtc = properties(false).connector.crtc_id;
            let time = self.clock.now();
            self.queued.borrow_mut().extend(
                request
                    .writes()
                    .iter()
                    .filter(|w| w.property == connector_crtc)
                    .map(|w| CompletionEvent {
                        crtc: drm::control::from_u32(w.value as u32).unwrap(),
                        time,
                    }),
            );
            (&self.wake).write_all(&[0])
        }

        fn read_events(&self) -> io::Result<Vec<CompletionEvent>> {
            let mut buf = [0u8; 64];
            loop {
                match (&self.readable).read(&mut buf) {
                    Ok(0) => break,
                    Ok(_) => continue,
                    Err(err) if err.kind() == io::ErrorKind::WouldBlock => break,
                    Err(err) => return Err(err),
                }
            }
            Ok(self.queued.borrow_mut().drain(..).collect())
        }
    }

    fn adapter(outputs: Vec<Output<DummyImage>>, renderer: TestRenderer) -> Adapter<MockDevice, TestRenderer> {
        Adapter::new(MockDevice::default(), renderer, outputs, &AdapterConfig::default()).unwrap()
    }

    fn at(nanos: u64) -> Time<Monotonic> {
        Time::from_nanos(nanos)
    }

    fn complete(adapter: &mut Adapter<MockDevice, TestRenderer>, crtc: u32, nanos: u64) {
        adapter.device().events.borrow_mut().push(CompletionEvent {
            crtc: drm::control::from_u32(crtc).unwrap(),
            time: at(nanos),
        });
        adapter.process_events().unwrap();
    }

    fn assert_rings_idle<D: KmsDevice>(adapter: &Adapter<D, TestRenderer>) {
        for output in adapter.outputs() {
            assert_eq!(output.pending(), None);
            assert_eq!(output.ring().count(BufferState::Rendering), 0);
            assert_eq!(output.ring().count(BufferState::PendingCommit), 0);
        }
    }

    #[test]
    fn no_outputs_is_fatal() {
        let res = Adapter::new(
            MockDevice::default(),
            TestRenderer::default(),
            Vec::new(),
            &AdapterConfig::default(),
        );
        assert!(matches!(
            res,
            Err(AdapterError::Drm(crate::backend::drm::Error::NoActiveOutputs))
        ));
    }

    #[test]
    fn modeset_only_on_first_commit() {
        let mut adapter = adapter(vec![output(1, false)], TestRenderer::default());
        let interval = INTERVAL.as_nanos() as u64;
        let mut now = 1_000_000_000;
        for _ in 0..5 {
            assert!(adapter.iterate(at(now)).unwrap());
            // not due again until the completion arrives
            assert!(!adapter.iterate(at(now)).unwrap());
            now += interval;
            complete(&mut adapter, 1, now);
        }

        let commits = adapter.device().commits.borrow();
        assert_eq!(commits.len(), 5);
        assert!(commits[0].1.contains(AtomicCommitFlags::ALLOW_MODESET));
        for (_, flags) in commits.iter() {
            assert!(flags.contains(AtomicCommitFlags::NONBLOCK | AtomicCommitFlags::PAGE_FLIP_EVENT));
        }
        for (_, flags) in commits.iter().skip(1) {
            assert!(!flags.contains(AtomicCommitFlags::ALLOW_MODESET));
        }
    }

    #[test]
    fn unknown_crtc_is_ignored() {
        let mut adapter = adapter(vec![output(1, false)], TestRenderer::default());
        adapter.iterate(at(1_000_000_000)).unwrap();

        let pending = adapter.outputs()[0].pending();
        assert!(!adapter.dispatch(CompletionEvent {
            crtc: drm::control::from_u32(99).unwrap(),
            time: at(1_016_666_666),
        }));
        let output = &adapter.outputs()[0];
        assert_eq!(output.pending(), pending);
        assert_eq!(output.displayed(), None);
        assert!(!output.needs_repaint());
        assert!(output.clock().last_completion().is_none());
    }

    #[test]
    fn in_fence_attached_when_fencing_supported() {
        let renderer = TestRenderer {
            fencing: true,
            ..Default::default()
        };
        let mut adapter = adapter(vec![output(1, true)], renderer);
        assert!(adapter.outputs()[0].explicit_fencing());
        adapter.iterate(at(1_000_000_000)).unwrap();

        let props = properties(true);
        let output = &adapter.outputs()[0];
        let commits = adapter.device().commits.borrow();
        let (request, _) = &commits[0];
        let in_fence = request
            .value_of(output.plane(), props.plane.in_fence_fd.unwrap())
            .expect("in-fence written");
        assert!(in_fence as i32 >= 0);
        assert!(request
            .value_of(output.crtc(), props.crtc.out_fence_ptr.unwrap())
            .is_some());
    }

    #[test]
    fn renderer_without_fences_disables_fencing() {
        let mut adapter = adapter(vec![output(1, true)], TestRenderer::default());
        assert!(!adapter.outputs()[0].explicit_fencing());
        adapter.iterate(at(1_000_000_000)).unwrap();

        let props = properties(true);
        let output = &adapter.outputs()[0];
        let commits = adapter.device().commits.borrow();
        let (request, _) = &commits[0];
        assert_eq!(request.value_of(output.plane(), props.plane.in_fence_fd.unwrap()), None);
        assert_eq!(request.value_of(output.crtc(), props.crtc.out_fence_ptr.unwrap()), None);
        assert_eq!(request.value_of(output.crtc(), props.crtc.active), Some(1));
    }

    #[test]
    fn outputs_share_one_commit() {
        let mut adapter = adapter(vec![output(1, false), output(2, false)], TestRenderer::default());
        adapter.iterate(at(1_000_000_000)).unwrap();
        let commits = adapter.device().commits.borrow();
        assert_eq!(commits.len(), 1);
        let crtc_writes = commits[0]
            .0
            .writes()
            .iter()
            .filter(|w| w.property == properties(false).connector.crtc_id)
            .count();
        assert_eq!(crtc_writes, 2);
    }

    #[test]
    fn rejected_commit_holds_output_until_retry() {
        let mut adapter = adapter(vec![output(1, false), output(2, false)], TestRenderer::default());
        adapter.device().reject.set(true);
        assert!(matches!(
            adapter.iterate(at(1_000_000_000)),
            Err(AdapterError::Commit(_))
        ));
        assert_eq!(adapter.held_outputs().len(), 2);
        assert!(!adapter.repaint_due());
        assert!(!adapter.commits_in_flight());
        for output in adapter.outputs() {
            assert!(!output.needs_repaint());
            assert_eq!(output.ring().count(BufferState::Free), 3);
        }

        // nothing is attempted again within the same cycle
        adapter.device().reject.set(false);
        assert!(!adapter.iterate(at(1_001_000_000)).unwrap());
        assert!(adapter.device().commits.borrow().is_empty());
        assert!(adapter.held_outputs().is_empty());

        assert!(adapter.retry_output(drm::control::from_u32(1).unwrap()));
        assert!(!adapter.retry_output(drm::control::from_u32(99).unwrap()));
        assert!(adapter.iterate(at(1_016_666_666)).unwrap());
        let commits = adapter.device().commits.borrow();
        assert_eq!(commits.len(), 1);
        assert!(commits[0].1.contains(AtomicCommitFlags::ALLOW_MODESET));
        assert!(!adapter.outputs()[1].needs_repaint());
    }

    #[test]
    fn render_failure_rolls_back_whole_iteration() {
        let renderer = TestRenderer {
            fail_on: Some(1),
            ..Default::default()
        };
        let mut adapter = adapter(vec![output(1, false), output(2, false)], renderer);
        assert!(matches!(
            adapter.iterate(at(1_000_000_000)),
            Err(AdapterError::Render(_))
        ));
        assert!(adapter.device().commits.borrow().is_empty());
        assert!(!adapter.commits_in_flight());
        assert_rings_idle(&adapter);
        for output in adapter.outputs() {
            assert!(output.needs_repaint());
            assert_eq!(output.ring().count(BufferState::Free), 3);
        }

        assert!(adapter.iterate(at(1_001_000_000)).unwrap());
        let commits = adapter.device().commits.borrow();
        assert_eq!(commits.len(), 1);
        let crtc_writes = commits[0]
            .0
            .writes()
            .iter()
            .filter(|w| w.property == properties(false).connector.crtc_id)
            .count();
        assert_eq!(crtc_writes, 2);
    }

    #[test]
    fn run_stops_on_interrupt() {
        let mut adapter = Adapter::new(
            LoopDevice::new(false, 3),
            TestRenderer::default(),
            vec![output(1, false)],
            &AdapterConfig::default(),
        )
        .unwrap();
        adapter.run().unwrap();

        assert_eq!(adapter.device().attempts.get(), 3);
        assert!(!adapter.commits_in_flight());
        let output = &adapter.outputs()[0];
        assert!(output.displayed().is_some());
        assert_eq!(output.ring().count(BufferState::Displayed), 1);
        assert_eq!(adapter.renderer().frames.len(), 3);
    }

    #[test]
    fn run_survives_rejected_commits() {
        let mut adapter = Adapter::new(
            LoopDevice::new(true, 3),
            TestRenderer::default(),
            vec![output(1, false)],
            &AdapterConfig::default(),
        )
        .unwrap();
        let started = Instant::now();
        adapter.run().unwrap();

        // every retry waited for one refresh cycle
        assert_eq!(adapter.device().attempts.get(), 3);
        assert!(started.elapsed() >= 2 * INTERVAL);
        assert!(!adapter.outputs()[0].needs_repaint());
        assert_eq!(adapter.outputs()[0].ring().count(BufferState::Free), 3);
    }

    #[test]
    fn run_drains_after_render_failure() {
        let renderer = TestRenderer {
            fail_on: Some(3),
            ..Default::default()
        };
        let mut adapter = Adapter::new(
            LoopDevice::new(false, usize::MAX),
            renderer,
            vec![output(1, false), output(2, false)],
            &AdapterConfig::default(),
        )
        .unwrap();
        assert!(matches!(adapter.run(), Err(AdapterError::Render(_))));

        assert_eq!(adapter.device().attempts.get(), 1);
        assert!(!adapter.commits_in_flight());
        assert_rings_idle(&adapter);
        for output in adapter.outputs() {
            assert!(output.needs_repaint());
            assert!(output.displayed().is_some());
        }
    }
}
