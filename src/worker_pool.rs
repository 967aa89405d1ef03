//! Fixed-size pool of worker threads that drive accepted connections
//! through read, request parsing, and response writing.
//!
//! Workers take `Event`s off a shared channel fed by the reactor thread,
//! and report back which token just finished so the reactor can rearm or
//! deregister it. This is the same work-sharing shape as a classic fixed
//! thread pool, adapted to mio's readiness model instead of a plain task
//! queue.

use std::io::{ErrorKind, Read, Write};
use std::sync::Arc;

use crossbeam_channel::{Receiver, Sender};
use mio::event::Source;
use mio::{Token, Waker};

use crate::connection::{Connection, WriteOutcome};
use crate::net::tcp_stream::TcpStream;

/// A readiness event paired with the connection it happened on.
pub struct Event<S: TcpStream + Read + Write + Source> {
    pub connection: Arc<std::sync::Mutex<Connection<S>>>,
    pub event: mio::event::Event,
}

/// Consumes `Event`s and drives reads/parses/writes against the
/// connection they name.
pub struct Worker<S: TcpStream + Read + Write + Source + std::os::unix::io::AsRawFd> {
    events: Receiver<Event<S>>,
    completions: Sender<Token>,
    reactor_waker: Arc<Waker>,
    conn_et: bool,
}

impl<S: TcpStream + Read + Write + Source + std::os::unix::io::AsRawFd> Worker<S> {
    pub fn new(
        events: Receiver<Event<S>>,
        completions: Sender<Token>,
        reactor_waker: Arc<Waker>,
        conn_et: bool,
    ) -> Self {
        Self {
            events,
            completions,
            reactor_waker,
            conn_et,
        }
    }

    fn report_done(&self, token: Token) -> Result<(), ()> {
        self.completions.send(token).map_err(|_| ())?;
        self.reactor_waker.wake().map_err(|_| ())
    }

    /// Main loop: blocks until the channel closes (server shutdown).
    pub fn run(&mut self) {
        while let Ok(Event { connection, event }) = self.events.recv() {
            let mut conn = match connection.lock() {
                Ok(c) => c,
                Err(poisoned) => poisoned.into_inner(),
            };

            if event.is_readable() {
                match conn.read(self.conn_et) {
                    Ok(_) => {
                        conn.touch();
                        conn.process();
                    }
                    Err(e) if e.kind() == ErrorKind::WouldBlock => {}
                    Err(_) => conn.close(),
                }
            }

            if event.is_writable() && !conn.is_closed() {
                match conn.write(self.conn_et) {
                    Ok(WriteOutcome::Done) => {
                        if !conn.keep_alive() {
                            conn.close();
                        }
                    }
                    Ok(WriteOutcome::WouldBlock) | Ok(WriteOutcome::Partial) => {}
                    Err(_) => conn.close(),
                }
            }

            let token = conn.token();
            drop(conn);
            if self.report_done(token).is_err() {
                return;
            }
        }
    }
}
