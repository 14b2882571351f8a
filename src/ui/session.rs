//! Client session pool for the control-plane listener
//!
//! One session per accepted TCP connection, drawn from a fixed pool.
//! The connection index is stable for the session's life and is what
//! resource UI locks and broadcast bindings refer to.

use crate::reactor::fdtab::FdId;
use std::io::Write;
use std::net::{SocketAddr, TcpStream};

/// Default size of the session pool; connections past the pool size
/// are refused ([`crate::config::ControlConfig::max_sessions`]
/// overrides it)
pub const MAX_SESSIONS: usize = 32;
/// Longest accepted command line, excluding the newline
pub const MAX_LINE: usize = 127;
/// Prompt byte emitted when a command completes
pub const PROMPT: u8 = b'\\';

/// One client connection
pub struct UiSession {
    pub conn: usize,
    pub stream: TcpStream,
    pub peer: SocketAddr,
    /// Line accumulator; a command is processed at each newline
    pub line_buf: Vec<u8>,
    /// Set while the accumulator overflowed; the offending line is
    /// reported once its terminating newline arrives
    pub overflow: bool,
    /// Broadcast binding; nonzero locks this session to one resource's
    /// stream and further inbound bytes are discarded
    pub bcast_key: u32,
    /// Reactor registration, removed at teardown
    pub fd_id: FdId,
}

/// What happened to a session write
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    Sent,
    /// Socket buffer full; the payload is dropped, the session lives
    Dropped,
    /// Write error; the session must be torn down
    Dead,
}

/// The session pool
pub struct SessionTable {
    sessions: Vec<Option<UiSession>>,
}

impl SessionTable {
    pub fn new(max_sessions: usize) -> Self {
        Self {
            sessions: (0..max_sessions).map(|_| None).collect(),
        }
    }

    /// Lowest free connection index, if any
    pub fn next_free(&self) -> Option<usize> {
        self.sessions.iter().position(|s| s.is_none())
    }

    /// Install a session at a previously reserved index
    pub fn open_at(&mut self, conn: usize, stream: TcpStream, peer: SocketAddr, fd_id: FdId) {
        self.sessions[conn] = Some(UiSession {
            conn,
            stream,
            peer,
            line_buf: Vec::with_capacity(MAX_LINE),
            overflow: false,
            bcast_key: 0,
            fd_id,
        });
    }

    /// Remove and return a session
    pub fn close(&mut self, conn: usize) -> Option<UiSession> {
        self.sessions.get_mut(conn)?.take()
    }

    pub fn get(&self, conn: usize) -> Option<&UiSession> {
        self.sessions.get(conn)?.as_ref()
    }

    pub fn get_mut(&mut self, conn: usize) -> Option<&mut UiSession> {
        self.sessions.get_mut(conn)?.as_mut()
    }

    /// Write to one session
    ///
    /// A full socket buffer drops the payload rather than blocking the
    /// reactor; the daemon applies no flow control beyond that.
    pub fn write(&mut self, conn: usize, bytes: &[u8]) -> WriteOutcome {
        let Some(session) = self.get_mut(conn) else {
            // the reply outlived the client; drop it
            return WriteOutcome::Dropped;
        };
        match session.stream.write(bytes) {
            Ok(_) => WriteOutcome::Sent,
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                log::debug!("client {} not keeping up, payload dropped", session.peer);
                WriteOutcome::Dropped
            }
            Err(e) => {
                log::debug!("write to client {} failed: {}", session.peer, e);
                WriteOutcome::Dead
            }
        }
    }

    /// Fan a payload out to every session bound to `key`
    ///
    /// Returns how many sessions matched and the connections whose
    /// sockets failed (the caller tears those down). A dropped payload
    /// still counts as a match: the subscriber exists, it is just slow.
    pub fn fan_out(&mut self, key: u32, payload: &[u8]) -> (usize, Vec<usize>) {
        let mut matched = 0;
        let mut dead = Vec::new();
        for conn in 0..self.sessions.len() {
            let bound = matches!(&self.sessions[conn], Some(s) if s.bcast_key == key);
            if !bound {
                continue;
            }
            match self.write(conn, payload) {
                WriteOutcome::Dead => dead.push(conn),
                _ => matched += 1,
            }
        }
        (matched, dead)
    }

    /// Active connection indices, ascending
    pub fn active(&self) -> Vec<usize> {
        self.sessions
            .iter()
            .enumerate()
            .filter_map(|(i, s)| s.as_ref().map(|_| i))
            .collect()
    }
}

impl Default for SessionTable {
    fn default() -> Self {
        Self::new(MAX_SESSIONS)
    }
}
