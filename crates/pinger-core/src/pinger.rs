use crate::config::PingerConfig;
use crate::error::{Error, Result};
use crate::net::Network;
use crate::resolver::ResolvedAddr;
use crate::stats::Statistics;
use crate::types::{Family, Identifier, RunId, Sequence};
use std::fmt::{Display, Formatter};
use std::net::IpAddr;
use std::sync::Arc;
use std::thread;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

/// An `ICMP` echo pinger.
///
/// See the [`crate`] documentation for more information.
///
/// Note that this is type cheaply cloneable.
#[derive(Debug, Clone)]
pub struct Pinger {
    inner: Arc<inner::PingerInner>,
}

impl Pinger {
    /// Create a `Pinger`.
    ///
    /// Use the [`crate::Builder`] type to create a [`Pinger`].
    #[must_use]
    pub(crate) fn new(config: PingerConfig, resolved: ResolvedAddr) -> Self {
        Self {
            inner: Arc::new(inner::PingerInner::new(config, resolved)),
        }
    }

    /// Run the [`Pinger`].
    ///
    /// This method blocks until the run reaches a terminal [`RunState`]. The
    /// run ends at the earlier of `deadline` and the configured
    /// [`crate::Builder::timeout`].
    ///
    /// Errors opening the socket are returned directly, errors during the run
    /// are reported in the [`Outcome`]. Both end the run in
    /// [`RunState::Failed`].
    ///
    /// # Example
    ///
    /// The following pings `1.1.1.1` three times and prints the loss:
    ///
    /// ```no_run
    /// # fn main() -> anyhow::Result<()> {
    /// use pinger_core::Builder;
    ///
    /// let pinger = Builder::new("1.1.1.1").count(3).build()?;
    /// let outcome = pinger.start(None)?;
    /// println!("{:.1}% packet loss", outcome.statistics.packet_loss_pct);
    /// # Ok(())
    /// # }
    /// ```
    ///
    /// # See Also
    ///
    /// - [`Pinger::spawn`] - Run the pinger on a new thread.
    pub fn start(&self, deadline: Option<Instant>) -> Result<Outcome> {
        self.inner.start(deadline)
    }

    /// Spawn the pinger on a new thread.
    ///
    /// This method will spawn a new thread to run the pinger and immediately
    /// return the [`Pinger`] and a handle to the thread, so it may be joined
    /// with [`JoinHandle::join`].
    ///
    /// # Example
    ///
    /// The following pings until stopped, taking a snapshot every 5 seconds:
    ///
    /// ```no_run
    /// # fn main() -> anyhow::Result<()> {
    /// # use std::thread;
    /// # use std::time::Duration;
    /// use pinger_core::Builder;
    ///
    /// let (pinger, handle) = Builder::new("example.com").build()?.spawn(None)?;
    /// for _ in 0..3 {
    ///     thread::sleep(Duration::from_secs(5));
    ///     let stats = pinger.snapshot();
    ///     println!("{} of {} received", stats.packets_received, stats.packets_sent);
    /// }
    /// pinger.stop();
    /// let _outcome = handle.join().unwrap()?;
    /// # Ok(())
    /// # }
    /// ```
    pub fn spawn(self, deadline: Option<Instant>) -> Result<(Self, JoinHandle<Result<Outcome>>)> {
        let pinger = self.clone();
        let handle = thread::Builder::new()
            .name(format!("pinger-{}", self.identifier().0))
            .spawn(move || pinger.start(deadline))
            .map_err(|err| Error::Other(err.to_string()))?;
        Ok((self, handle))
    }

    /// Stop the run.
    ///
    /// May be called from any thread and any number of times. A stop before
    /// the run starts ends it immediately, a stop after it has ended does
    /// nothing.
    pub fn stop(&self) {
        self.inner.stop();
    }

    /// The address being pinged.
    #[must_use]
    pub fn resolved_addr(&self) -> IpAddr {
        self.inner.resolved_addr()
    }

    /// The address family of the run.
    #[must_use]
    pub fn family(&self) -> Family {
        self.inner.family()
    }

    /// The target as given to the [`crate::Builder`].
    #[must_use]
    pub fn target(&self) -> &str {
        self.inner.target()
    }

    /// The echo identifier of the run.
    #[must_use]
    pub fn identifier(&self) -> Identifier {
        self.inner.identifier()
    }

    /// The run id embedded in every probe of the run.
    #[must_use]
    pub fn run_id(&self) -> RunId {
        self.inner.run_id()
    }

    /// The current state of the run.
    #[must_use]
    pub fn state(&self) -> RunState {
        self.inner.state()
    }

    /// Take a snapshot of the statistics.
    #[must_use]
    pub fn snapshot(&self) -> Statistics {
        self.inner.snapshot()
    }

    /// Run over the given network rather than opening a socket.
    pub(crate) fn start_with<N: Network + Sync>(
        &self,
        deadline: Option<Instant>,
        network: N,
    ) -> Result<Outcome> {
        self.inner.run(deadline, || Ok(network))
    }
}

/// The lifecycle of a run.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum RunState {
    /// Not yet started.
    Idle,
    /// Sending and receiving.
    Running,
    /// Stopped on request.
    Stopped,
    /// All probes were sent and each was answered or expired.
    Completed,
    /// The deadline was reached.
    TimedOut,
    /// A fatal error ended the run.
    Failed,
}

impl RunState {
    /// Has the run ended?
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        !matches!(self, Self::Idle | Self::Running)
    }
}

impl Display for RunState {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Running => write!(f, "running"),
            Self::Stopped => write!(f, "stopped"),
            Self::Completed => write!(f, "completed"),
            Self::TimedOut => write!(f, "timed out"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// How a run ended.
#[derive(Debug, Clone, PartialEq)]
pub struct Outcome {
    /// The terminal state of the run.
    pub state: RunState,
    /// The final statistics, including the error for a failed run.
    pub statistics: Statistics,
}

/// A matched echo reply.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct Packet {
    /// The size of the `ICMP` message in bytes.
    pub size: usize,
    /// The address the reply came from.
    pub source: IpAddr,
    /// The sequence of the probe.
    pub sequence: Sequence,
    /// The round trip time.
    pub rtt: Duration,
}

mod inner {
    use super::{Outcome, Packet, RunState};
    use crate::codec::{Decoded, EchoPacket, IcmpError};
    use crate::config::{PingerConfig, PrivilegeMode};
    use crate::error::{Error, Result};
    use crate::net::channel::Channel;
    use crate::net::{Network, SocketImpl};
    use crate::probe::Response;
    use crate::resolver::ResolvedAddr;
    use crate::stats::{Statistics, StatisticsAggregator};
    use crate::tracker::{Match, SequenceTracker};
    use crate::types::{Family, Identifier, RunId};
    use crossbeam::channel::{at, bounded, never, select, Receiver, Sender, TryRecvError};
    use parking_lot::{Mutex, RwLock};
    use pinger_privilege::Privilege;
    use std::net::IpAddr;
    use std::thread;
    use std::time::{Instant, SystemTime};
    use tracing::instrument;

    /// The state shared by the send and receive loops.
    #[derive(Debug)]
    struct Session {
        tracker: SequenceTracker,
        stats: StatisticsAggregator,
    }

    /// Reports `Failed` to the coordinator if a loop thread unwinds.
    struct UnwindGuard<'a>(&'a Sender<RunState>);

    impl Drop for UnwindGuard<'_> {
        fn drop(&mut self) {
            if thread::panicking() {
                let _ = self.0.try_send(RunState::Failed);
            }
        }
    }

    #[derive(Debug)]
    pub(super) struct PingerInner {
        config: PingerConfig,
        resolved: ResolvedAddr,
        state: RwLock<RunState>,
        session: Mutex<Session>,
        stop_tx: Sender<()>,
        stop_rx: Receiver<()>,
    }

    impl PingerInner {
        pub(super) fn new(config: PingerConfig, resolved: ResolvedAddr) -> Self {
            let (stop_tx, stop_rx) = bounded(1);
            let session = Session {
                tracker: SequenceTracker::new(
                    config.identifier,
                    config.count,
                    config.reply_timeout,
                ),
                stats: StatisticsAggregator::new(resolved.addr),
            };
            Self {
                config,
                resolved,
                state: RwLock::new(RunState::Idle),
                session: Mutex::new(session),
                stop_tx,
                stop_rx,
            }
        }

        #[instrument(skip_all, level = "trace")]
        pub(super) fn start(&self, deadline: Option<Instant>) -> Result<Outcome> {
            self.run(deadline, || self.open())
        }

        pub(super) fn stop(&self) {
            if self.state().is_terminal() {
                return;
            }
            tracing::debug!("stop requested");
            // a full channel means a stop is already pending
            let _ = self.stop_tx.try_send(());
        }

        pub(super) const fn resolved_addr(&self) -> IpAddr {
            self.resolved.addr
        }

        pub(super) const fn family(&self) -> Family {
            self.resolved.family
        }

        pub(super) fn target(&self) -> &str {
            &self.config.target
        }

        pub(super) const fn identifier(&self) -> Identifier {
            self.config.identifier
        }

        pub(super) const fn run_id(&self) -> RunId {
            self.config.run_id
        }

        pub(super) fn state(&self) -> RunState {
            *self.state.read()
        }

        pub(super) fn snapshot(&self) -> Statistics {
            self.session.lock().stats.snapshot()
        }

        /// Run to a terminal state over the network returned by `open`.
        #[instrument(skip_all, level = "trace")]
        pub(super) fn run<N, F>(&self, deadline: Option<Instant>, open: F) -> Result<Outcome>
        where
            N: Network + Sync,
            F: FnOnce() -> Result<N>,
        {
            self.begin()?;
            if self.stop_rx.try_recv().is_ok() {
                return Ok(self.finish(RunState::Stopped));
            }
            let network = open().map_err(|err| self.handle_open_error(err))?;
            let state = self.run_loops(deadline, &network).unwrap_or_else(|err| {
                tracing::warn!(%err, "run failed");
                self.session.lock().stats.set_error(err.to_string());
                RunState::Failed
            });
            Ok(self.finish(state))
        }

        fn begin(&self) -> Result<()> {
            let mut state = self.state.write();
            if *state != RunState::Idle {
                return Err(Error::AlreadyStarted);
            }
            *state = RunState::Running;
            Ok(())
        }

        #[instrument(skip_all, level = "trace")]
        fn open(&self) -> Result<Channel<SocketImpl>> {
            if self.config.privilege_mode == PrivilegeMode::Privileged {
                let privilege = Privilege::acquire_privileges()?;
                tracing::debug!(has_privileges = privilege.has_privileges());
            }
            let channel = Channel::<SocketImpl>::connect(&self.config.channel_config())?;
            if self.config.drop_privileges {
                Privilege::drop_privileges()?;
            }
            Ok(channel)
        }

        fn handle_open_error(&self, err: Error) -> Error {
            self.session.lock().stats.set_error(err.to_string());
            self.finish(RunState::Failed);
            err
        }

        /// Run the send and receive loops until a terminal state is reached.
        fn run_loops<N: Network + Sync>(
            &self,
            deadline: Option<Instant>,
            network: &N,
        ) -> Result<RunState> {
            let deadline = self.effective_deadline(deadline, Instant::now());
            tracing::debug!(addr = %self.resolved.addr, ?deadline, "run started");
            let (cancel_tx, cancel_rx) = bounded::<()>(0);
            let (done_tx, done_rx) = bounded::<RunState>(2);
            thread::scope(|scope| -> Result<RunState> {
                let sender = thread::Builder::new()
                    .name(String::from("pinger-send"))
                    .spawn_scoped(scope, || {
                        let _guard = UnwindGuard(&done_tx);
                        self.send_loop(network, &cancel_rx, &done_tx);
                    })
                    .map_err(|err| Error::Other(err.to_string()))?;
                let receiver = thread::Builder::new()
                    .name(String::from("pinger-recv"))
                    .spawn_scoped(scope, || {
                        let _guard = UnwindGuard(&done_tx);
                        self.recv_loop(network, &cancel_rx, &done_tx);
                    })
                    .map_err(|err| Error::Other(err.to_string()))?;
                let state = select! {
                    recv(self.stop_rx) -> _ => RunState::Stopped,
                    recv(done_rx) -> state => state.unwrap_or(RunState::Failed),
                    recv(deadline.map_or_else(never, at)) -> _ => RunState::TimedOut,
                };
                drop(cancel_tx);
                sender
                    .join()
                    .map_err(|_| Error::Other(String::from("send loop panicked")))?;
                receiver
                    .join()
                    .map_err(|_| Error::Other(String::from("receive loop panicked")))?;
                Ok(state)
            })
        }

        /// The earlier of `deadline` and the configured timeout from `now`.
        fn effective_deadline(&self, deadline: Option<Instant>, now: Instant) -> Option<Instant> {
            let timeout = now.checked_add(self.config.timeout);
            match (deadline, timeout) {
                (Some(deadline), Some(timeout)) => Some(deadline.min(timeout)),
                (deadline, timeout) => deadline.or(timeout),
            }
        }

        /// Send a probe every `interval` until `count` probes have been sent
        /// or the loop is cancelled.
        #[instrument(skip_all, level = "trace")]
        fn send_loop<N: Network>(
            &self,
            network: &N,
            cancel: &Receiver<()>,
            done: &Sender<RunState>,
        ) {
            loop {
                if !matches!(cancel.try_recv(), Err(TryRecvError::Empty)) {
                    break;
                }
                let result = {
                    let mut session = self.session.lock();
                    let Some(probe) = session
                        .tracker
                        .next_probe(Instant::now(), SystemTime::now())
                    else {
                        break;
                    };
                    // a reply must not be matched before its probe is counted
                    let result = network.send_probe(&probe);
                    if result.is_ok() {
                        session.stats.record_sent();
                        tracing::trace!(
                            sequence = probe.sequence.0,
                            attempted = session.tracker.sent(),
                            in_flight = session.tracker.in_flight(),
                            "sent probe"
                        );
                    } else {
                        session.tracker.fail(probe.sequence);
                    }
                    result.map_err(|err| (probe.sequence, err))
                };
                match result {
                    Ok(()) => {}
                    Err((sequence, Error::ProbeFailed(err))) => {
                        tracing::warn!(sequence = sequence.0, %err, "probe failed");
                    }
                    Err((_, err)) => {
                        self.fail(&err, done);
                        break;
                    }
                }
                select! {
                    recv(cancel) -> _ => break,
                    default(self.config.interval) => {}
                }
            }
        }

        /// Receive, match and expire until the run completes or the loop is
        /// cancelled.
        #[instrument(skip_all, level = "trace")]
        fn recv_loop<N: Network>(
            &self,
            network: &N,
            cancel: &Receiver<()>,
            done: &Sender<RunState>,
        ) {
            let preserves_identifier = network.preserves_identifier();
            loop {
                if !matches!(cancel.try_recv(), Err(TryRecvError::Empty)) {
                    break;
                }
                if self.expire_and_check_complete() {
                    let _ = done.try_send(RunState::Completed);
                    break;
                }
                match network.recv_response() {
                    Ok(Some(response)) => {
                        if let Some(state) = self.handle_response(preserves_identifier, response)
                        {
                            let _ = done.try_send(state);
                            break;
                        }
                    }
                    Ok(None) => {}
                    Err(Error::Decode(err)) => tracing::debug!(%err, "dropped packet"),
                    Err(err) => {
                        self.fail(&err, done);
                        break;
                    }
                }
            }
        }

        fn expire_and_check_complete(&self) -> bool {
            let mut session = self.session.lock();
            session.tracker.expire(Instant::now());
            session.tracker.is_complete()
        }

        /// Handle a response, returning a terminal state if it ends the run.
        fn handle_response(
            &self,
            preserves_identifier: bool,
            response: Response,
        ) -> Option<RunState> {
            match response.message {
                Decoded::Echo(echo) => {
                    self.handle_echo_reply(
                        preserves_identifier,
                        response.source,
                        response.received,
                        &echo,
                    );
                    None
                }
                Decoded::IcmpError(error) => {
                    self.handle_icmp_error(preserves_identifier, response.source, &error)
                }
            }
        }

        fn handle_echo_reply(
            &self,
            preserves_identifier: bool,
            source: IpAddr,
            received: Instant,
            echo: &EchoPacket,
        ) {
            if echo.run_id != self.config.run_id {
                tracing::trace!(run_id = echo.run_id.0, "ignored reply from another run");
                return;
            }
            if preserves_identifier && echo.identifier != self.config.identifier {
                tracing::trace!(identifier = echo.identifier.0, "ignored reply for another identifier");
                return;
            }
            let packet = {
                let mut session = self.session.lock();
                match session.tracker.match_reply(echo.sequence, received) {
                    Match::Matched { probe, rtt } => {
                        session.stats.record_received(rtt);
                        Some(Packet {
                            size: echo.size(),
                            source,
                            sequence: probe.sequence,
                            rtt,
                        })
                    }
                    Match::Duplicate(sequence) => {
                        session.stats.record_duplicate();
                        tracing::debug!(sequence = sequence.0, "duplicate reply");
                        None
                    }
                    Match::Unknown(sequence) => {
                        tracing::debug!(sequence = sequence.0, "late or unknown reply");
                        None
                    }
                }
            };
            if let (Some(packet), Some(on_recv)) = (packet, &self.config.handlers.on_recv) {
                on_recv(&packet);
            }
        }

        /// Handle an `ICMP` error about one of our in-flight probes.
        ///
        /// The probe is counted as lost. Errors which cannot be attributed to
        /// an in-flight probe are ignored.
        fn handle_icmp_error(
            &self,
            preserves_identifier: bool,
            source: IpAddr,
            error: &IcmpError,
        ) -> Option<RunState> {
            if preserves_identifier && error.identifier != Some(self.config.identifier) {
                tracing::trace!(%error, "ignored ICMP error for another identifier");
                return None;
            }
            let sequence = error.sequence?;
            let failed = self.session.lock().tracker.fail(sequence);
            if failed.is_none() {
                tracing::debug!(%error, "ignored ICMP error for unknown probe");
                return None;
            }
            tracing::warn!(%source, %error, "ICMP error");
            if let Some(on_icmp_error) = &self.config.handlers.on_icmp_error {
                on_icmp_error(source, error);
            }
            if self.config.stop_on_icmp_error {
                let err = Error::Other(format!("{error} from {source}"));
                self.session.lock().stats.set_error(err.to_string());
                Some(RunState::Failed)
            } else {
                None
            }
        }

        fn fail(&self, err: &Error, done: &Sender<RunState>) {
            tracing::warn!(%err, "run failed");
            self.session.lock().stats.set_error(err.to_string());
            let _ = done.try_send(RunState::Failed);
        }

        fn finish(&self, state: RunState) -> Outcome {
            *self.state.write() = state;
            let statistics = self.snapshot();
            tracing::debug!(%state, ?statistics, "run finished");
            if let Some(on_finish) = &self.config.handlers.on_finish {
                on_finish(&statistics);
            }
            Outcome { state, statistics }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::Builder;
    use crate::codec::{Decoded, EchoPacket, IcmpError, IcmpErrorKind};
    use crate::error::IoError;
    use crate::probe::{Probe, Response};
    use crate::types::RunId;
    use parking_lot::Mutex;
    use std::io;
    use std::net::{Ipv4Addr, SocketAddr};
    use std::sync::atomic::{AtomicUsize, Ordering};

    const TARGET: IpAddr = IpAddr::V4(Ipv4Addr::LOCALHOST);
    const READ_TIMEOUT: Duration = Duration::from_millis(5);

    type Script = Box<dyn Fn(usize, &Probe) -> ScriptedSend + Send + Sync>;

    /// What the fake network does with the nth probe sent.
    enum ScriptedSend {
        Reply(Vec<(Duration, Decoded)>),
        Error(Error),
    }

    /// A network which answers probes according to a script.
    ///
    /// Each reply is delivered once its delay has passed and carries a
    /// receive time of exactly `sent + delay` so round trip times are
    /// deterministic.
    struct FakeNetwork {
        script: Script,
        sent: AtomicUsize,
        pending: Mutex<Vec<Response>>,
    }

    impl FakeNetwork {
        fn new(script: impl Fn(usize, &Probe) -> ScriptedSend + Send + Sync + 'static) -> Self {
            Self {
                script: Box::new(script),
                sent: AtomicUsize::new(0),
                pending: Mutex::new(vec![]),
            }
        }

        fn take_due(&self, now: Instant) -> Option<Response> {
            let mut pending = self.pending.lock();
            let (index, _) = pending
                .iter()
                .enumerate()
                .filter(|(_, response)| response.received <= now)
                .min_by_key(|(_, response)| response.received)?;
            Some(pending.remove(index))
        }
    }

    impl Network for FakeNetwork {
        fn send_probe(&self, probe: &Probe) -> Result<()> {
            let nth = self.sent.fetch_add(1, Ordering::SeqCst);
            match (self.script)(nth, probe) {
                ScriptedSend::Reply(replies) => {
                    self.pending.lock().extend(replies.into_iter().map(|(delay, message)| {
                        Response::new(TARGET, probe.sent + delay, message)
                    }));
                    Ok(())
                }
                ScriptedSend::Error(err) => Err(err),
            }
        }

        fn recv_response(&self) -> Result<Option<Response>> {
            let start = Instant::now();
            while start.elapsed() < READ_TIMEOUT {
                if let Some(response) = self.take_due(Instant::now()) {
                    return Ok(Some(response));
                }
                thread::sleep(Duration::from_millis(1));
            }
            Ok(None)
        }

        fn preserves_identifier(&self) -> bool {
            true
        }
    }

    fn echo_reply(probe: &Probe, run_id: RunId) -> Decoded {
        Decoded::Echo(EchoPacket {
            identifier: probe.identifier,
            sequence: probe.sequence,
            checksum: 0,
            sent_at: probe.sent_at,
            run_id,
            payload: vec![0; 56],
        })
    }

    fn dest_unreachable(probe: &Probe) -> Decoded {
        Decoded::IcmpError(IcmpError {
            kind: IcmpErrorKind::DestinationUnreachable,
            code: 1,
            identifier: Some(probe.identifier),
            sequence: Some(probe.sequence),
        })
    }

    fn builder() -> Builder {
        Builder::new("127.0.0.1")
            .interval(Duration::from_millis(1))
            .read_timeout(READ_TIMEOUT)
    }

    fn millis(ms: u64) -> Duration {
        Duration::from_millis(ms)
    }

    #[test]
    fn test_fixed_rtts_complete() -> anyhow::Result<()> {
        let received = Arc::new(Mutex::new(vec![]));
        let on_recv = received.clone();
        let pinger = builder()
            .count(5)
            .on_recv(move |packet| on_recv.lock().push(*packet))
            .build()?;
        let run_id = pinger.run_id();
        let network = FakeNetwork::new(move |nth, probe| {
            let rtt = millis(10 * (nth as u64 + 1));
            ScriptedSend::Reply(vec![(rtt, echo_reply(probe, run_id))])
        });
        let outcome = pinger.start_with(None, network)?;
        let stats = outcome.statistics;
        assert_eq!(RunState::Completed, outcome.state);
        assert_eq!(RunState::Completed, pinger.state());
        assert_eq!(5, stats.packets_sent);
        assert_eq!(5, stats.packets_received);
        assert_eq!(0, stats.duplicates_received);
        assert_eq!(0_f64, stats.packet_loss_pct);
        assert_eq!(millis(10), stats.min_rtt);
        assert_eq!(millis(50), stats.max_rtt);
        assert_eq!(millis(30), stats.avg_rtt);
        assert_eq!(Duration::from_nanos(14_142_136), stats.stddev_rtt);
        assert_eq!(None, stats.error);
        let received = received.lock();
        assert_eq!(5, received.len());
        let mut sequences = received.iter().map(|p| p.sequence.0).collect::<Vec<_>>();
        sequences.sort_unstable();
        assert_eq!(vec![0, 1, 2, 3, 4], sequences);
        assert!(received.iter().all(|p| p.source == TARGET && p.size == 64));
        Ok(())
    }

    #[test]
    fn test_no_replies_times_out() -> anyhow::Result<()> {
        let pinger = builder()
            .count(3)
            .interval(millis(10))
            .timeout(millis(200))
            .build()?;
        let network = FakeNetwork::new(|_, _| ScriptedSend::Reply(vec![]));
        let started = Instant::now();
        let outcome = pinger.start_with(None, network)?;
        assert!(started.elapsed() >= millis(200));
        assert_eq!(RunState::TimedOut, outcome.state);
        assert_eq!(3, outcome.statistics.packets_sent);
        assert_eq!(0, outcome.statistics.packets_received);
        assert_eq!(100_f64, outcome.statistics.packet_loss_pct);
        Ok(())
    }

    #[test]
    fn test_deadline_earlier_than_timeout() -> anyhow::Result<()> {
        let pinger = builder().interval(millis(10)).build()?;
        let network = FakeNetwork::new(|_, _| ScriptedSend::Reply(vec![]));
        let outcome = pinger.start_with(Some(Instant::now() + millis(50)), network)?;
        assert_eq!(RunState::TimedOut, outcome.state);
        Ok(())
    }

    #[test]
    fn test_expired_probes_complete() -> anyhow::Result<()> {
        let pinger = builder()
            .count(2)
            .reply_timeout(millis(20))
            .build()?;
        let network = FakeNetwork::new(|_, _| ScriptedSend::Reply(vec![]));
        let outcome = pinger.start_with(None, network)?;
        assert_eq!(RunState::Completed, outcome.state);
        assert_eq!(2, outcome.statistics.packets_sent);
        assert_eq!(0, outcome.statistics.packets_received);
        Ok(())
    }

    #[test]
    fn test_late_reply_not_counted() -> anyhow::Result<()> {
        let pinger = builder()
            .count(1)
            .reply_timeout(millis(20))
            .build()?;
        let run_id = pinger.run_id();
        let network = FakeNetwork::new(move |_, probe| {
            ScriptedSend::Reply(vec![(millis(30), echo_reply(probe, run_id))])
        });
        let outcome = pinger.start_with(None, network)?;
        assert_eq!(RunState::Completed, outcome.state);
        assert_eq!(0, outcome.statistics.packets_received);
        assert_eq!(100_f64, outcome.statistics.packet_loss_pct);
        Ok(())
    }

    #[test]
    fn test_stop_after_two_probes() -> anyhow::Result<()> {
        let pinger = builder().count(5).interval(millis(200)).build()?;
        let run_id = pinger.run_id();
        let network = FakeNetwork::new(move |_, probe| {
            ScriptedSend::Reply(vec![(millis(1), echo_reply(probe, run_id))])
        });
        let outcome = thread::scope(|scope| {
            let handle = scope.spawn(|| pinger.start_with(None, network));
            while pinger.snapshot().packets_sent < 2 {
                thread::sleep(millis(1));
            }
            pinger.stop();
            handle.join().unwrap()
        })?;
        assert_eq!(RunState::Stopped, outcome.state);
        assert_eq!(2, outcome.statistics.packets_sent);
        pinger.stop();
        assert_eq!(RunState::Stopped, pinger.state());
        Ok(())
    }

    #[test]
    fn test_stop_before_start() -> anyhow::Result<()> {
        let finished = Arc::new(AtomicUsize::new(0));
        let on_finish = finished.clone();
        let pinger = builder()
            .count(1)
            .on_finish(move |_| {
                on_finish.fetch_add(1, Ordering::SeqCst);
            })
            .build()?;
        pinger.stop();
        pinger.stop();
        let network = FakeNetwork::new(|_, _| unreachable!("no probe should be sent"));
        let outcome = pinger.start_with(None, network)?;
        assert_eq!(RunState::Stopped, outcome.state);
        assert_eq!(0, outcome.statistics.packets_sent);
        assert_eq!(1, finished.load(Ordering::SeqCst));
        Ok(())
    }

    #[test]
    fn test_foreign_run_id_ignored() -> anyhow::Result<()> {
        let pinger = builder().count(2).build()?;
        let run_id = pinger.run_id();
        let foreign = RunId(run_id.0.wrapping_add(1));
        let network = FakeNetwork::new(move |_, probe| {
            ScriptedSend::Reply(vec![
                (millis(1), echo_reply(probe, foreign)),
                (millis(3), echo_reply(probe, run_id)),
            ])
        });
        let outcome = pinger.start_with(None, network)?;
        assert_eq!(RunState::Completed, outcome.state);
        assert_eq!(2, outcome.statistics.packets_received);
        assert_eq!(0, outcome.statistics.duplicates_received);
        assert_eq!(millis(3), outcome.statistics.min_rtt);
        Ok(())
    }

    #[test]
    fn test_foreign_identifier_ignored() -> anyhow::Result<()> {
        let pinger = builder().count(1).identifier(Some(7)).build()?;
        let run_id = pinger.run_id();
        let network = FakeNetwork::new(move |_, probe| {
            let other = Probe {
                identifier: Identifier(8),
                ..*probe
            };
            ScriptedSend::Reply(vec![
                (millis(1), echo_reply(&other, run_id)),
                (millis(2), echo_reply(probe, run_id)),
            ])
        });
        let outcome = pinger.start_with(None, network)?;
        assert_eq!(1, outcome.statistics.packets_received);
        assert_eq!(millis(2), outcome.statistics.min_rtt);
        Ok(())
    }

    #[test]
    fn test_duplicates_counted_separately() -> anyhow::Result<()> {
        let received = Arc::new(AtomicUsize::new(0));
        let on_recv = received.clone();
        let pinger = builder()
            .count(3)
            .interval(millis(20))
            .on_recv(move |_| {
                on_recv.fetch_add(1, Ordering::SeqCst);
            })
            .build()?;
        let run_id = pinger.run_id();
        let network = FakeNetwork::new(move |_, probe| {
            ScriptedSend::Reply(vec![
                (millis(2), echo_reply(probe, run_id)),
                (millis(4), echo_reply(probe, run_id)),
            ])
        });
        let outcome = pinger.start_with(None, network)?;
        let stats = outcome.statistics;
        assert_eq!(3, stats.packets_received);
        assert!((2..=3).contains(&stats.duplicates_received));
        assert_eq!(millis(2), stats.max_rtt);
        assert_eq!(3, received.load(Ordering::SeqCst));
        Ok(())
    }

    #[test]
    fn test_on_finish_fires_once() -> anyhow::Result<()> {
        let finished = Arc::new(Mutex::new(vec![]));
        let on_finish = finished.clone();
        let pinger = builder()
            .count(2)
            .on_finish(move |stats| on_finish.lock().push(stats.clone()))
            .build()?;
        let run_id = pinger.run_id();
        let network = FakeNetwork::new(move |_, probe| {
            ScriptedSend::Reply(vec![(millis(1), echo_reply(probe, run_id))])
        });
        let outcome = pinger.start_with(None, network)?;
        let finished = finished.lock();
        assert_eq!(1, finished.len());
        assert_eq!(outcome.statistics, finished[0]);
        Ok(())
    }

    #[test]
    fn test_already_started() -> anyhow::Result<()> {
        let pinger = builder().count(0).build()?;
        let network = FakeNetwork::new(|_, _| ScriptedSend::Reply(vec![]));
        let outcome = pinger.start_with(None, network)?;
        assert_eq!(RunState::Completed, outcome.state);
        let err = pinger
            .start_with(None, FakeNetwork::new(|_, _| ScriptedSend::Reply(vec![])))
            .unwrap_err();
        assert!(matches!(err, Error::AlreadyStarted));
        Ok(())
    }

    #[test]
    fn test_open_error() -> anyhow::Result<()> {
        let finished = Arc::new(AtomicUsize::new(0));
        let on_finish = finished.clone();
        let pinger = builder()
            .count(1)
            .on_finish(move |_| {
                on_finish.fetch_add(1, Ordering::SeqCst);
            })
            .build()?;
        let err = pinger
            .inner
            .run::<FakeNetwork, _>(None, || Err(Error::Other(String::from("boom"))))
            .unwrap_err();
        assert!(matches!(err, Error::Other(_)));
        assert_eq!(RunState::Failed, pinger.state());
        assert_eq!(Some(String::from("pinger error: boom")), pinger.snapshot().error);
        assert_eq!(1, finished.load(Ordering::SeqCst));
        Ok(())
    }

    #[test]
    fn test_transport_error_fails_run() -> anyhow::Result<()> {
        let pinger = builder().count(5).build()?;
        let run_id = pinger.run_id();
        let network = FakeNetwork::new(move |nth, probe| {
            if nth == 1 {
                let addr = SocketAddr::new(TARGET, 0);
                ScriptedSend::Error(Error::Transport(IoError::SendTo(
                    io::Error::from(io::ErrorKind::PermissionDenied),
                    addr,
                )))
            } else {
                ScriptedSend::Reply(vec![(millis(1), echo_reply(probe, run_id))])
            }
        });
        let outcome = pinger.start_with(None, network)?;
        assert_eq!(RunState::Failed, outcome.state);
        assert_eq!(1, outcome.statistics.packets_sent);
        assert!(outcome.statistics.error.is_some());
        Ok(())
    }

    #[test]
    fn test_failed_first_send_not_counted() -> anyhow::Result<()> {
        let pinger = builder().count(3).build()?;
        let network = FakeNetwork::new(|_, _| {
            let addr = SocketAddr::new(TARGET, 0);
            ScriptedSend::Error(Error::Transport(IoError::SendTo(
                io::Error::from(io::ErrorKind::PermissionDenied),
                addr,
            )))
        });
        let outcome = pinger.start_with(None, network)?;
        assert_eq!(RunState::Failed, outcome.state);
        assert_eq!(0, outcome.statistics.packets_sent);
        assert_eq!(0_f64, outcome.statistics.packet_loss_pct);
        Ok(())
    }

    #[test]
    fn test_probe_failed_continues() -> anyhow::Result<()> {
        let pinger = builder()
            .count(3)
            .reply_timeout(millis(20))
            .build()?;
        let run_id = pinger.run_id();
        let network = FakeNetwork::new(move |nth, probe| {
            if nth == 0 {
                let addr = SocketAddr::new(TARGET, 0);
                ScriptedSend::Error(Error::ProbeFailed(IoError::SendTo(
                    io::Error::from(io::ErrorKind::WouldBlock),
                    addr,
                )))
            } else {
                ScriptedSend::Reply(vec![(millis(1), echo_reply(probe, run_id))])
            }
        });
        let outcome = pinger.start_with(None, network)?;
        assert_eq!(RunState::Completed, outcome.state);
        assert_eq!(2, outcome.statistics.packets_sent);
        assert_eq!(2, outcome.statistics.packets_received);
        assert_eq!(0_f64, outcome.statistics.packet_loss_pct);
        Ok(())
    }

    #[test]
    fn test_icmp_error_counts_as_lost() -> anyhow::Result<()> {
        let errors = Arc::new(Mutex::new(vec![]));
        let on_icmp_error = errors.clone();
        let pinger = builder()
            .count(2)
            .on_icmp_error(move |source, error| on_icmp_error.lock().push((source, *error)))
            .build()?;
        let network = FakeNetwork::new(|_, probe| {
            ScriptedSend::Reply(vec![(millis(1), dest_unreachable(probe))])
        });
        let outcome = pinger.start_with(None, network)?;
        assert_eq!(RunState::Completed, outcome.state);
        assert_eq!(0, outcome.statistics.packets_received);
        assert_eq!(100_f64, outcome.statistics.packet_loss_pct);
        let errors = errors.lock();
        assert_eq!(2, errors.len());
        assert!(errors
            .iter()
            .all(|(source, error)| *source == TARGET
                && error.kind == IcmpErrorKind::DestinationUnreachable));
        Ok(())
    }

    #[test]
    fn test_stop_on_icmp_error() -> anyhow::Result<()> {
        let pinger = builder()
            .count(5)
            .interval(millis(50))
            .stop_on_icmp_error(true)
            .build()?;
        let network = FakeNetwork::new(|_, probe| {
            ScriptedSend::Reply(vec![(millis(1), dest_unreachable(probe))])
        });
        let outcome = pinger.start_with(None, network)?;
        assert_eq!(RunState::Failed, outcome.state);
        assert_eq!(1, outcome.statistics.packets_sent);
        assert_eq!(
            Some(String::from(
                "pinger error: destination unreachable (code 1) for icmp_seq=0 from 127.0.0.1"
            )),
            outcome.statistics.error
        );
        Ok(())
    }

    #[test]
    fn test_panicking_handler_fails_run() -> anyhow::Result<()> {
        let pinger = builder()
            .count(1)
            .timeout(Duration::from_secs(30))
            .on_recv(|_| panic!("handler failed"))
            .build()?;
        let run_id = pinger.run_id();
        let network = FakeNetwork::new(move |_, probe| {
            ScriptedSend::Reply(vec![(millis(1), echo_reply(probe, run_id))])
        });
        let started = Instant::now();
        let outcome = pinger.start_with(None, network)?;
        assert!(started.elapsed() < Duration::from_secs(5));
        assert_eq!(RunState::Failed, outcome.state);
        assert_eq!(RunState::Failed, pinger.state());
        assert_eq!(
            Some(String::from("pinger error: receive loop panicked")),
            outcome.statistics.error
        );
        Ok(())
    }

    #[test]
    fn test_no_probe_sent_after_stop() -> anyhow::Result<()> {
        let pinger = builder().count(10).interval(millis(100)).build()?;
        let stopper = pinger.clone();
        let network = FakeNetwork::new(move |nth, _| {
            if nth == 1 {
                stopper.stop();
            }
            ScriptedSend::Reply(vec![])
        });
        let outcome = pinger.start_with(None, network)?;
        assert_eq!(RunState::Stopped, outcome.state);
        assert_eq!(2, outcome.statistics.packets_sent);
        Ok(())
    }

    #[test]
    fn test_run_state_is_terminal() {
        assert!(!RunState::Idle.is_terminal());
        assert!(!RunState::Running.is_terminal());
        assert!(RunState::Stopped.is_terminal());
        assert!(RunState::Completed.is_terminal());
        assert!(RunState::TimedOut.is_terminal());
        assert!(RunState::Failed.is_terminal());
    }
}
