//! The daemon: all tables, the event loop, and dispatch
//!
//! Everything the reactor drives lives in one `Daemon` value: the FPGA
//! link, the slot/core tables, the timer and handle pools, and the
//! client session pool. All dispatch happens from the single reactor
//! thread, so no callback ever runs concurrently with another and no
//! locking exists anywhere in the crate.
//!
//! Data flow: client TCP -> command parser -> resource lookup -> driver
//! callback -> link -> serial, and in reverse, serial -> link -> packet
//! check -> driver packet callback -> broadcast fan-out -> client TCP.

use crate::config::{parse_overload, Config};
use crate::core::driver::{Driver, Services};
use crate::core::router::check_frame;
use crate::core::slot::{Core, Slot, MAX_SLOTS, NUM_CORES};
use crate::devices;
use crate::error::{Error, Result};
use crate::link::FpgaLink;
use crate::reactor::fdtab::{FdOwner, Interest};
use crate::reactor::{Event, Reactor};
use crate::transport::{SerialTransport, Transport};
use crate::ui::command;
use crate::ui::session::{SessionTable, WriteOutcome, MAX_LINE, PROMPT};
use std::io::Read;
use std::net::{SocketAddr, TcpListener};
use std::os::fd::AsRawFd;
use std::sync::atomic::{AtomicBool, Ordering};

/// The daemon state and event loop
pub struct Daemon {
    pub(crate) config: Config,
    pub(crate) link: FpgaLink,
    pub(crate) slots: Vec<Slot>,
    pub(crate) cores: Vec<Core>,
    pub(crate) reactor: Reactor,
    pub(crate) sessions: SessionTable,
    listener: TcpListener,
}

impl Daemon {
    /// Build a daemon on the configured serial port
    pub fn new(config: Config) -> Result<Self> {
        let transport = SerialTransport::open(&config.serial.port, config.serial.baud_rate)?;
        Self::with_transport(config, Box::new(transport))
    }

    /// Build a daemon on an arbitrary transport (tests, simulators)
    pub fn with_transport(config: Config, transport: Box<dyn Transport>) -> Result<Self> {
        let link = FpgaLink::new(transport, &config.serial.port);

        let listener = TcpListener::bind(&config.network.bind_address).map_err(|e| {
            Error::Config(format!(
                "failed to bind to {}: {}",
                config.network.bind_address, e
            ))
        })?;
        listener.set_nonblocking(true)?;
        log::info!("control plane listening on {}", listener.local_addr()?);

        let max_sessions = config.control.max_sessions;
        let mut daemon = Daemon {
            config,
            link,
            slots: (0..MAX_SLOTS).map(Slot::new).collect(),
            cores: (0..NUM_CORES).map(Core::new).collect(),
            reactor: Reactor::new(),
            sessions: SessionTable::new(max_sessions),
            listener,
        };

        daemon.reactor.fds.add(
            daemon.listener.as_raw_fd(),
            Interest::Read,
            FdOwner::Listener,
        )?;
        if let Some(fd) = daemon.link.raw_fd() {
            daemon.reactor.fds.add(fd, Interest::Read, FdOwner::Link)?;
        }

        // explicit slot assignments first, then the enumerator boots
        // slot 0 and discovers the rest
        for entry in daemon.config.slots.load.clone() {
            let (slot, name) = parse_overload(&entry)?;
            daemon.load_driver(Some(slot), name, None)?;
        }
        if !daemon.slots[0].occupied {
            daemon.load_driver(Some(0), "enumerator", None)?;
        }

        Ok(daemon)
    }

    /// Address the control-plane listener is bound to
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Run the event loop until `running` goes false or the link dies
    pub fn run(&mut self, running: &AtomicBool) -> Result<()> {
        // a transport with no pollable handle is pumped each iteration
        let poll_mode = self.link.raw_fd().is_none();
        let mut events = Vec::new();

        log::info!("entering event loop");
        while running.load(Ordering::Relaxed) {
            events.clear();
            self.reactor.wait(&mut events)?;
            if poll_mode {
                self.pump_serial()?;
            }

            for i in 0..events.len() {
                match events[i] {
                    Event::Fd(FdOwner::Link, _) => self.pump_serial()?,
                    Event::Fd(FdOwner::Listener, _) => self.accept_clients(),
                    Event::Fd(FdOwner::Session(conn), _) => self.session_readable(conn),
                    Event::Fd(FdOwner::Slot { slot, token }, readiness) => {
                        self.with_driver(slot, None, |driver, ctx| {
                            driver.on_fd(ctx, token, readiness)
                        });
                    }
                    Event::Timer(owner) => {
                        self.with_driver(owner.slot, None, |driver, ctx| {
                            driver.on_timer(ctx, owner.token)
                        });
                    }
                }
            }
        }
        log::info!("event loop stopped");
        Ok(())
    }

    // ------------------------------------------------------------------
    // Serial side
    // ------------------------------------------------------------------

    /// Drain the serial link and dispatch completed frames
    pub(crate) fn pump_serial(&mut self) -> Result<()> {
        let frames = match self.link.pump() {
            Ok(frames) => frames,
            Err(e) => {
                log::error!("cannot read from board at {}: {}", self.link.port_name(), e);
                return Err(e);
            }
        };
        for frame in frames {
            self.dispatch_frame(&frame);
        }
        Ok(())
    }

    /// Validate one frame and route it to the owning driver
    pub(crate) fn dispatch_frame(&mut self, frame: &[u8]) {
        let pkt = match check_frame(frame) {
            Ok(pkt) => pkt,
            Err(e) => {
                log::warn!(
                    "invalid packet from board at {}: {}",
                    self.link.port_name(),
                    e
                );
                return;
            }
        };

        let entry = self.cores[pkt.core as usize];
        match entry.slot {
            Some(slot) if entry.has_handler => {
                self.with_driver(slot, None, |driver, ctx| driver.on_packet(ctx, &pkt));
            }
            _ => {
                // unsolicited frames can arrive before every driver is
                // registered; normal during startup
                log::debug!(
                    "no driver for core {} at {}",
                    pkt.core,
                    self.link.port_name()
                );
            }
        }
    }

    // ------------------------------------------------------------------
    // Client side
    // ------------------------------------------------------------------

    /// Accept pending client connections
    pub(crate) fn accept_clients(&mut self) {
        loop {
            match self.listener.accept() {
                Ok((stream, peer)) => {
                    let Some(conn) = self.sessions.next_free() else {
                        log::warn!("session pool full, refusing {}", peer);
                        continue; // stream drops and closes
                    };
                    if let Err(e) = stream.set_nonblocking(true) {
                        log::warn!("cannot set {} nonblocking: {}", peer, e);
                        continue;
                    }
                    let fd_id = match self.reactor.fds.add(
                        stream.as_raw_fd(),
                        Interest::Read,
                        FdOwner::Session(conn),
                    ) {
                        Ok(id) => id,
                        Err(e) => {
                            log::warn!("refusing {}: {}", peer, e);
                            continue;
                        }
                    };
                    self.sessions.open_at(conn, stream, peer, fd_id);
                    log::info!("client {} connected as connection {}", peer, conn);
                }
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => break,
                Err(e) => {
                    log::error!("accept error: {}", e);
                    break;
                }
            }
        }
    }

    /// Read from a session and process any completed lines
    pub(crate) fn session_readable(&mut self, conn: usize) {
        // a None entry means the overlong-line flag fired for that line
        let mut lines: Vec<Option<String>> = Vec::new();
        let mut closed = false;

        let Some(session) = self.sessions.get_mut(conn) else {
            return;
        };
        let mut buf = [0u8; 256];
        loop {
            match session.stream.read(&mut buf) {
                Ok(0) => {
                    closed = true;
                    break;
                }
                Ok(n) => {
                    for &b in &buf[..n] {
                        if b == b'\n' {
                            if session.overflow {
                                session.overflow = false;
                                lines.push(None);
                            } else {
                                lines.push(Some(
                                    String::from_utf8_lossy(&session.line_buf).into_owned(),
                                ));
                            }
                            session.line_buf.clear();
                        } else if b == b'\r' {
                            // tolerated before the newline
                        } else if session.line_buf.len() >= MAX_LINE {
                            session.line_buf.clear();
                            session.overflow = true;
                        } else if !session.overflow {
                            session.line_buf.push(b);
                        }
                    }
                }
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => break,
                Err(_) => {
                    closed = true;
                    break;
                }
            }
        }

        if closed {
            self.close_session(conn);
            return;
        }

        // a session bound to a broadcast stream is dedicated; its
        // further input is discarded
        if self.sessions.get(conn).map(|s| s.bcast_key != 0).unwrap_or(true) {
            return;
        }

        for line in lines {
            match line {
                Some(line) => command::process_line(self, conn, &line),
                None => {
                    self.write_session(conn, b"ERROR : command too long\n");
                    self.write_session(conn, &[PROMPT]);
                }
            }
            // a cat command mid-batch dedicates the session
            if self.sessions.get(conn).map(|s| s.bcast_key != 0).unwrap_or(true) {
                break;
            }
        }
    }

    /// Tear down a session and its reactor registration
    ///
    /// The session's broadcast binding dies with it; the resource-side
    /// key is cleared lazily by the next empty fan-out.
    pub(crate) fn close_session(&mut self, conn: usize) {
        if let Some(session) = self.sessions.close(conn) {
            self.reactor.fds.remove(session.fd_id);
            log::info!("client {} disconnected", session.peer);
        }
    }

    /// Write to a session, tearing it down on a hard failure
    pub(crate) fn write_session(&mut self, conn: usize, bytes: &[u8]) {
        if self.sessions.write(conn, bytes) == WriteOutcome::Dead {
            self.close_session(conn);
        }
    }

    /// Fan a payload out to every session bound to `key`
    pub(crate) fn fan_out(&mut self, key: u32, payload: &[u8]) -> usize {
        let (matched, dead) = self.sessions.fan_out(key, payload);
        for conn in dead {
            self.close_session(conn);
        }
        matched
    }

    // ------------------------------------------------------------------
    // Driver host
    // ------------------------------------------------------------------

    /// Check a driver out of its slot, run one callback, put it back
    pub(crate) fn with_driver<R>(
        &mut self,
        slot: usize,
        session: Option<usize>,
        f: impl FnOnce(&mut dyn Driver, &mut Services<'_>) -> R,
    ) -> Option<R> {
        let mut driver = self.slots[slot].driver.take()?;
        let mut ctx = Services {
            daemon: self,
            slot,
            session,
        };
        let out = f(driver.as_mut(), &mut ctx);
        self.slots[slot].driver = Some(driver);
        Some(out)
    }

    /// Load a registry driver into a slot and initialise it
    ///
    /// `slot` of `None` picks the next free slot; `core` overrides the
    /// slot's default core assignment (used by the enumerator).
    pub(crate) fn load_driver(
        &mut self,
        slot: Option<usize>,
        name: &str,
        core: Option<usize>,
    ) -> Result<usize> {
        let slot_idx = match slot {
            Some(s) => s,
            None => self
                .slots
                .iter()
                .position(|s| !s.occupied)
                .ok_or(Error::PoolExhausted("slot"))?,
        };
        if self.slots[slot_idx].occupied {
            return Err(Error::Other(format!("slot {} is already in use", slot_idx)));
        }

        let driver = devices::create_driver(name)
            .ok_or_else(|| Error::UnknownDriver(name.to_string()))?;

        {
            let entry = &mut self.slots[slot_idx];
            entry.occupied = true;
            entry.driver_name = name.to_string();
            if core.is_some() {
                entry.core = core;
            }
            entry.driver = Some(driver);
        }
        log::info!("loading driver '{}' into slot {}", name, slot_idx);

        let result = self
            .with_driver(slot_idx, None, |driver, ctx| driver.initialize(ctx))
            .expect("freshly installed driver");
        if let Err(e) = result {
            log::error!("driver '{}' failed to initialize: {}", name, e);
            self.unload_slot(slot_idx);
            return Err(Error::DriverInit(format!("{}: {}", name, e)));
        }
        Ok(slot_idx)
    }

    /// Free a slot and everything registered on its behalf
    fn unload_slot(&mut self, slot: usize) {
        self.reactor.timers.cancel_slot(slot);
        self.reactor.fds.remove_slot(slot);
        for core in &mut self.cores {
            if core.slot == Some(slot) {
                core.slot = None;
                core.has_handler = false;
            }
        }
        self.slots[slot].clear();
    }

    /// Resolve a slot selector: a decimal index or a driver name
    ///
    /// Name lookup walks slots in ascending order and returns the first
    /// match; callers needing a specific instance use the index.
    pub(crate) fn find_slot(&self, selector: &str) -> Option<usize> {
        if let Ok(idx) = selector.parse::<usize>() {
            return (idx < MAX_SLOTS && self.slots[idx].occupied).then_some(idx);
        }
        self.slots
            .iter()
            .position(|s| s.occupied && s.name == selector)
    }
}
