//! Connections and listeners as nodes of the graph.
use std::collections::VecDeque;
use std::mem;
use std::sync::{Arc, Weak};

use parking_lot::{Condvar, Mutex, MutexGuard};

use crate::conduit::{Conduit, Connector, Disconnector, Installer, Receiver, Uninstaller};
use crate::layer::icmp::{classify, Severity};
use crate::layer::{Endpoint, Error, Result};
use crate::messenger::{InetMessenger, Messenger, Op};
use crate::stack::Context;
use crate::time::{Duration, Instant};
use crate::timer::Token;
use crate::wire::{Ipv4Address, TcpRepr};

use super::tcb::{reset_for, Signals, State, Tcb};
use super::{local_mss, segment, send};

/// One connection: its record and its place in the graph.
pub(crate) struct Stream {
    ctx: Arc<Context>,
    pub(crate) tcb: Mutex<Tcb>,
    changed: Condvar,
    node: Mutex<Weak<Conduit>>,
    timer: Mutex<Option<(Instant, Token)>>,
    listener: Mutex<Weak<Listener>>,
}

/// The leaf of a stream in the connection tree.
struct StreamLeaf {
    stream: Arc<Stream>,
}

impl Receiver for StreamLeaf {
    fn input(&self, m: &mut InetMessenger, _: &Arc<Conduit>) -> bool {
        let (repr, payload) = match segment(m) {
            Some(segment) => segment,
            None => return false,
        };
        let now = self.stream.ctx.now();
        let signals = self.stream.tcb.lock().arrives(&repr, payload, now);
        self.stream.pump(signals, Some((m.local_ip(), m.remote_ip())));
        true
    }

    fn error(&self, m: &mut InetMessenger, _: &Arc<Conduit>) -> bool {
        let code = match m.error {
            Some(code) => code,
            None => return false,
        };
        let mut signals = Signals::default();
        {
            let mut tcb = self.stream.tcb.lock();
            if tcb.state == State::Closed || tcb.remote.addr != m.remote_ip() {
                return false;
            }
            match classify(&code) {
                Severity::Hard(err) => {
                    tcb.terminate(err);
                    signals.closed = true;
                },
                Severity::Soft(err) => tcb.soft_error = Some(err),
                Severity::PathMtu => {
                    if let Some(mtu) = m.remote.as_ref().and_then(|remote| remote.path_mtu()) {
                        tcb.path_mtu(mtu);
                    }
                },
                Severity::Quench => tcb.quench(),
            }
        }
        self.stream.pump(signals, None);
        true
    }
}

impl Stream {
    pub(crate) fn new(ctx: Arc<Context>, tcb: Tcb) -> Arc<Self> {
        Arc::new(Stream {
            ctx,
            tcb: Mutex::new(tcb),
            changed: Condvar::new(),
            node: Mutex::new(Weak::new()),
            timer: Mutex::new(None),
            listener: Mutex::new(Weak::new()),
        })
    }

    /// A message whose addressing is the connection's keys.
    fn keys(&self, local: Endpoint, remote: Endpoint) -> InetMessenger {
        let mut m = InetMessenger::new(Messenger::new(0), Op::Input);
        if !local.addr.is_unspecified() {
            m.local = Some(self.ctx.registry.address(local.addr));
        }
        if !remote.addr.is_unspecified() {
            m.remote = Some(self.ctx.registry.address(remote.addr));
        }
        m.local_port = local.port;
        m.remote_port = remote.port;
        m
    }

    /// Insert a new leaf for the stream into the connection tree.
    pub(crate) fn attach(self: &Arc<Self>, local: Endpoint, remote: Endpoint) -> Result<()> {
        let ports = self.ctx.tcp().and_then(|tcp| tcp.side_b()).ok_or(Error::Illegal)?;
        let leaf = Conduit::adapter("tcp stream", Arc::new(StreamLeaf { stream: self.clone() }));
        let node = Installer::with_leaf(&self.keys(local, remote), leaf).install(&ports)?;
        *self.node.lock() = Arc::downgrade(&node);
        Ok(())
    }

    /// Move the leaf of the stream to the keys of a connection.
    ///
    /// On failure the leaf goes back where it was.
    pub(crate) fn reattach(self: &Arc<Self>, local: Endpoint, remote: Endpoint) -> Result<()> {
        let node = match self.node.lock().upgrade() {
            Some(node) => node,
            None => return self.attach(local, remote),
        };
        let ports = self.ctx.tcp().and_then(|tcp| tcp.side_b()).ok_or(Error::Illegal)?;
        let old = {
            let tcb = self.tcb.lock();
            (tcb.local, tcb.remote)
        };
        Disconnector::new().disconnect(&node);
        match Connector::new(&self.keys(local, remote), node.clone()).connect(&ports) {
            Ok(_) => Ok(()),
            Err(err) => {
                if Connector::new(&self.keys(old.0, old.1), node).connect(&ports).is_err() {
                    net_debug!("tcp {}: lost its binding", old.0);
                }
                Err(err)
            },
        }
    }

    /// Send what the record wants sent and follow up on the signals.
    ///
    /// `peer` is the addressing of the segment that caused a reset, if there is one.
    pub(crate) fn pump(self: &Arc<Self>, signals: Signals,
        peer: Option<(Ipv4Address, Ipv4Address)>)
    {
        let now = self.ctx.now();
        let mut segments = Vec::new();
        let (local, remote, deadline) = {
            let mut tcb = self.tcb.lock();
            while let Some(segment) = tcb.dispatch(now) {
                segments.push(segment);
            }
            (tcb.local.addr, tcb.remote.addr, tcb.next_deadline())
        };
        self.changed.notify_all();

        if let Some(reset) = signals.reset {
            let (local, remote) = peer.unwrap_or((local, remote));
            send(&self.ctx, &reset, &[], local, remote, false);
        }
        for segment in segments {
            send(&self.ctx, &segment.repr, &segment.payload, local, remote, segment.dont_frag);
        }

        if signals.established {
            let listener = self.listener.lock().upgrade();
            if let Some(listener) = listener {
                listener.promote(self);
            }
        }
        if signals.closed {
            self.release();
        } else {
            self.schedule(deadline);
        }
    }

    /// Leave the graph and drop every timer.
    fn release(self: &Arc<Self>) {
        let node = mem::replace(&mut *self.node.lock(), Weak::new()).upgrade();
        if let Some(node) = node {
            Uninstaller::new().uninstall(&node);
        }
        if let Some((_, token)) = self.timer.lock().take() {
            self.ctx.timers.cancel(token);
        }
        let listener = mem::replace(&mut *self.listener.lock(), Weak::new()).upgrade();
        if let Some(listener) = listener {
            listener.forget(self);
        }
        self.changed.notify_all();
    }

    /// Keep the one pending callback in line with the earliest deadline of the record.
    fn schedule(self: &Arc<Self>, deadline: Option<Instant>) {
        let mut timer = self.timer.lock();
        if timer.map(|(at, _)| at) == deadline {
            return;
        }
        if let Some((_, token)) = timer.take() {
            self.ctx.timers.cancel(token);
        }
        if let Some(at) = deadline {
            let stream = Arc::downgrade(self);
            let token = self.ctx.timers.schedule(at, move || {
                if let Some(stream) = stream.upgrade() {
                    stream.expired(at);
                }
            });
            *timer = Some((at, token));
        }
    }

    fn expired(self: &Arc<Self>, at: Instant) {
        {
            let mut timer = self.timer.lock();
            if timer.map_or(false, |(pending, _)| pending == at) {
                *timer = None;
            }
        }
        let signals = self.tcb.lock().on_timer(self.ctx.now());
        self.pump(signals, None);
    }

    /// Wait for a change of the record, unless waiting is not allowed.
    fn wait(&self, tcb: &mut MutexGuard<Tcb>, timeout: Option<Duration>) -> Result<()> {
        wait_on(&self.ctx, &self.changed, tcb, timeout)
    }

    /// Open toward `remote` from `local`, both fully specified.
    pub(crate) fn connect(self: &Arc<Self>, local: Endpoint, remote: Endpoint) -> Result<()> {
        self.reattach(local, remote)?;
        let now = self.ctx.now();
        let iss = self.ctx.isn.get_isn(local.addr, local.port, remote.addr, remote.port, now);
        let mss = local_mss(&self.ctx, remote.addr);
        {
            let mut tcb = self.tcb.lock();
            tcb.local = local;
            tcb.connect(remote, iss, mss);
        }
        net_debug!("tcp {}: connecting to {}", local, remote);
        self.pump(Signals::default(), None);
        Ok(())
    }

    /// Wait until the handshake completes or fails.
    pub(crate) fn wait_connected(&self, timeout: Option<Duration>) -> Result<()> {
        let mut tcb = self.tcb.lock();
        loop {
            if let Some(err) = tcb.error {
                return Err(err);
            }
            match tcb.state {
                State::SynSent | State::SynReceived => (),
                State::Closed | State::Listen => return Err(Error::NotConnected),
                _ => return Ok(()),
            }
            self.wait(&mut tcb, timeout)?;
        }
    }

    pub(crate) fn read(self: &Arc<Self>, buf: &mut [u8], timeout: Option<Duration>)
        -> Result<usize>
    {
        let mut tcb = self.tcb.lock();
        loop {
            if !tcb.recv_ring.is_empty() {
                let count = tcb.read(buf);
                let update = tcb.ack_now;
                drop(tcb);
                if update {
                    self.pump(Signals::default(), None);
                }
                return Ok(count);
            }
            if let Some(err) = tcb.error {
                return Err(err);
            }
            if tcb.rcv.fin || tcb.shut_rd {
                return Ok(0);
            }
            match tcb.state {
                State::Closed | State::Listen => return Err(Error::NotConnected),
                _ => (),
            }
            if buf.is_empty() {
                return Ok(0);
            }
            self.wait(&mut tcb, timeout)?;
        }
    }

    pub(crate) fn write(self: &Arc<Self>, data: &[u8], urgent: bool, timeout: Option<Duration>)
        -> Result<usize>
    {
        let mut tcb = self.tcb.lock();
        loop {
            if let Some(err) = tcb.error {
                return Err(err);
            }
            if tcb.shut_wr {
                return Err(Error::Shutdown);
            }
            if !tcb.state.sends() {
                return Err(Error::NotConnected);
            }
            if data.is_empty() {
                return Ok(0);
            }
            let count = tcb.enqueue(data);
            if count > 0 {
                if urgent {
                    tcb.mark_urgent();
                }
                drop(tcb);
                self.pump(Signals::default(), None);
                return Ok(count);
            }
            self.wait(&mut tcb, timeout)?;
        }
    }

    /// Close from the user's side. The connection lingers until the FIN exchange ends.
    pub(crate) fn close(self: &Arc<Self>) {
        let signals = self.tcb.lock().close();
        self.pump(signals, None);
    }

    pub(crate) fn shutdown_output(self: &Arc<Self>) {
        self.tcb.lock().shutdown_output();
        self.pump(Signals::default(), None);
    }

    pub(crate) fn shutdown_input(&self) {
        self.tcb.lock().shutdown_input();
        self.changed.notify_all();
    }

    /// End the connection right away with a reset.
    pub(crate) fn abort(self: &Arc<Self>, error: Error) {
        let reset = self.tcb.lock().abort(error);
        self.pump(Signals { reset, closed: true, ..Signals::default() }, None);
    }
}

/// Block on `changed` as the clock and timeout allow.
///
/// A stack on a manual clock never blocks, nothing would advance it.
fn wait_on<T>(ctx: &Context, changed: &Condvar, guard: &mut MutexGuard<T>,
    timeout: Option<Duration>) -> Result<()>
{
    if ctx.timers.clock().is_manual() {
        return Err(Error::WouldBlock);
    }
    match timeout {
        Some(timeout) if timeout == Duration::from_millis(0) => Err(Error::WouldBlock),
        Some(timeout) => {
            if changed.wait_for(guard, timeout).timed_out() {
                Err(Error::TimedOut)
            } else {
                Ok(())
            }
        },
        None => {
            changed.wait(guard);
            Ok(())
        },
    }
}

/// A passive open: connection requests for one local port and address.
pub(crate) struct Listener {
    ctx: Arc<Context>,
    local: Endpoint,
    node: Mutex<Weak<Conduit>>,
    queue: Mutex<Backlog>,
    changed: Condvar,
}

struct Backlog {
    limit: usize,
    /// Connections in the handshake.
    pending: Vec<Arc<Stream>>,
    /// Established connections not yet accepted.
    ready: VecDeque<Arc<Stream>>,
    closed: bool,
}

struct ListenerLeaf {
    listener: Arc<Listener>,
}

impl Receiver for ListenerLeaf {
    fn input(&self, m: &mut InetMessenger, _: &Arc<Conduit>) -> bool {
        let (repr, _) = match segment(m) {
            Some(segment) => segment,
            None => return false,
        };
        if repr.flags.rst() {
            return false;
        }
        if repr.ack_number.is_some() {
            if let Some(reset) = reset_for(&repr) {
                send(&self.listener.ctx, &reset, &[], m.local_ip(), m.remote_ip(), false);
            }
            return false;
        }
        if !repr.flags.syn() {
            return false;
        }
        let local = Endpoint::new(m.local_ip(), repr.dst_port);
        let remote = Endpoint::new(m.remote_ip(), repr.src_port);
        self.listener.spawn(local, remote, &repr)
    }

    fn error(&self, _: &mut InetMessenger, _: &Arc<Conduit>) -> bool {
        false
    }
}

impl Listener {
    /// Listen on `local` and queue at most `backlog` connections.
    pub(crate) fn install(ctx: Arc<Context>, local: Endpoint, backlog: usize)
        -> Result<Arc<Self>>
    {
        let listeners = ctx.listeners().ok_or(Error::Illegal)?;
        let listener = Arc::new(Listener {
            ctx,
            local,
            node: Mutex::new(Weak::new()),
            queue: Mutex::new(Backlog {
                limit: backlog,
                pending: Vec::new(),
                ready: VecDeque::new(),
                closed: false,
            }),
            changed: Condvar::new(),
        });

        let mut m = InetMessenger::new(Messenger::new(0), Op::Input);
        if !local.addr.is_unspecified() {
            m.local = Some(listener.ctx.registry.address(local.addr));
        }
        m.local_port = local.port;
        let leaf = Conduit::adapter("tcp listener",
            Arc::new(ListenerLeaf { listener: listener.clone() }));
        let node = Installer::with_leaf(&m, leaf).install(&listeners)?;
        *listener.node.lock() = Arc::downgrade(&node);
        net_debug!("tcp {}: listening, backlog {}", local, backlog);
        Ok(listener)
    }

    pub(crate) fn local(&self) -> Endpoint {
        self.local
    }

    /// Answer a connection request, if the backlog has room.
    fn spawn(self: &Arc<Self>, local: Endpoint, remote: Endpoint, syn: &TcpRepr)
        -> bool
    {
        let mut queue = self.queue.lock();
        if queue.closed {
            return false;
        }
        if queue.pending.len() + queue.ready.len() >= queue.limit {
            net_debug!("tcp {}: backlog full, ignoring {}", self.local, remote);
            return false;
        }

        let now = self.ctx.now();
        let iss = self.ctx.isn.get_isn(local.addr, local.port, remote.addr, remote.port, now);
        let mss = local_mss(&self.ctx, remote.addr);
        let tcb = Tcb::accept(&self.ctx.config, local, remote, syn, iss, mss, now);
        let stream = Stream::new(self.ctx.clone(), tcb);
        *stream.listener.lock() = Arc::downgrade(self);
        if let Err(err) = stream.attach(local, remote) {
            net_debug!("tcp {}: cannot accept {}: {}", self.local, remote, err);
            return false;
        }
        queue.pending.push(stream.clone());
        drop(queue);

        net_trace!("tcp {}: connection request from {}", local, remote);
        stream.pump(Signals::default(), None);
        true
    }

    /// The handshake of `stream` completed.
    fn promote(&self, stream: &Arc<Stream>) {
        let mut queue = self.queue.lock();
        if let Some(index) = queue.pending.iter().position(|s| Arc::ptr_eq(s, stream)) {
            let stream = queue.pending.swap_remove(index);
            queue.ready.push_back(stream);
            self.changed.notify_all();
        }
    }

    /// `stream` ended before it was accepted.
    fn forget(&self, stream: &Arc<Stream>) {
        let mut queue = self.queue.lock();
        queue.pending.retain(|s| !Arc::ptr_eq(s, stream));
        queue.ready.retain(|s| !Arc::ptr_eq(s, stream));
    }

    /// Whether an established connection is waiting.
    pub(crate) fn is_acceptable(&self) -> bool {
        !self.queue.lock().ready.is_empty()
    }

    /// Take the next established connection.
    pub(crate) fn accept(&self, timeout: Option<Duration>) -> Result<Arc<Stream>> {
        let mut queue = self.queue.lock();
        loop {
            if let Some(stream) = queue.ready.pop_front() {
                *stream.listener.lock() = Weak::new();
                return Ok(stream);
            }
            if queue.closed {
                return Err(Error::NotConnected);
            }
            wait_on(&self.ctx, &self.changed, &mut queue, timeout)?;
        }
    }

    /// Stop listening and reset every connection not yet accepted.
    pub(crate) fn close(&self) {
        let streams: Vec<Arc<Stream>> = {
            let mut queue = self.queue.lock();
            queue.closed = true;
            let pending = mem::replace(&mut queue.pending, Vec::new());
            pending.into_iter().chain(queue.ready.drain(..)).collect()
        };
        for stream in streams {
            stream.abort(Error::ConnectionAborted);
        }
        let node = mem::replace(&mut *self.node.lock(), Weak::new()).upgrade();
        if let Some(node) = node {
            Uninstaller::new().uninstall(&node);
        }
        self.changed.notify_all();
        net_debug!("tcp {}: no longer listening", self.local);
    }
}
