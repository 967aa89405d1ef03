//! The reactor: owns the `mio::Poll` instance, the listening socket, and
//! the connection table, and hands every readiness event off to a worker
//! thread. Nothing here ever blocks on I/O belonging to a connection —
//! that's the worker pool's job.

use std::io::{self, ErrorKind, Read, Write};
use std::os::unix::io::AsRawFd;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crossbeam_channel::{Receiver, Sender, TryRecvError};
use mio::event::Source;
use mio::{Events, Interest, Poll, Token, Waker};
use slab::Slab;

use crate::connection::Connection;
use crate::db::DbPool;
use crate::logging::Logger;
use crate::mux::TriggerMode;
use crate::net::tcp_listener::TcpListener;
use crate::net::tcp_stream::TcpStream;
use crate::timer::Timer;
use crate::worker_pool::Event;
use crate::{log_error, log_info, log_warn};

const LISTEN_TOKEN: Token = Token(usize::MAX);
const WAKE_TOKEN: Token = Token(usize::MAX - 1);

/// Ceiling on simultaneously open connections; past this, new accepts are
/// turned away with a short busy response instead of being tracked.
const MAX_FD: usize = 65_536;
const BUSY_RESPONSE: &[u8] = b"Server busy!";

/// Runtime configuration the reactor needs, independent of the listening
/// socket and worker channels.
pub struct ServerConfig {
    pub trigger_mode: TriggerMode,
    pub connection_timeout: Option<Duration>,
    pub resource_dir: Arc<PathBuf>,
}

/// The single-threaded event loop: accepts connections, dispatches
/// readiness events to workers, and rearms or closes connections once a
/// worker reports completion.
pub struct Server<T, S>
where
    T: TcpListener<S> + Source,
    S: TcpStream + Read + Write + Source + AsRawFd + Send + 'static,
{
    inner: T,
    poll: Poll,
    connections: Slab<Arc<Mutex<Connection<S>>>>,
    workers: Sender<Event<S>>,
    completions: Receiver<Token>,
    waker: Arc<Waker>,
    timer: Timer,
    config: ServerConfig,
    db_pool: Arc<DbPool>,
    logger: Arc<Logger>,
    expired_tokens: Arc<Mutex<Vec<Token>>>,
    num_events: usize,
}

impl<T, S> Server<T, S>
where
    T: TcpListener<S> + Source,
    S: TcpStream + Read + Write + Source + AsRawFd + Send + 'static,
{
    pub fn new(
        mut tcp_listener: T,
        workers: Sender<Event<S>>,
        completions: Receiver<Token>,
        config: ServerConfig,
        db_pool: Arc<DbPool>,
        logger: Arc<Logger>,
    ) -> io::Result<Self> {
        let poll = Poll::new()?;
        poll.registry()
            .register(&mut tcp_listener, LISTEN_TOKEN, Interest::READABLE)?;
        let waker = Arc::new(Waker::new(poll.registry(), WAKE_TOKEN)?);

        Ok(Self {
            inner: tcp_listener,
            poll,
            connections: Slab::new(),
            workers,
            completions,
            waker,
            timer: Timer::new(),
            config,
            db_pool,
            logger,
            expired_tokens: Arc::new(Mutex::new(Vec::new())),
            num_events: 1024,
        })
    }

    /// A waker any other thread can use to nudge the reactor, e.g. after
    /// pushing a completed token onto `completions`.
    pub fn waker(&self) -> Arc<Waker> {
        Arc::clone(&self.waker)
    }

    fn accept(&mut self) -> io::Result<()> {
        loop {
            match self.inner.accept() {
                Ok((stream, addr)) => self.add_client(stream, addr),
                Err(ref e) if e.kind() == ErrorKind::WouldBlock => return Ok(()),
                Err(e) => return Err(e),
            }
            if !self.config.trigger_mode.listen_et {
                return Ok(());
            }
        }
    }

    fn add_client(&mut self, mut stream: S, addr: std::net::SocketAddr) {
        if self.connections.len() >= MAX_FD {
            log_warn!(self.logger, "too many clients! turning away {addr}");
            let _ = stream.write_all(BUSY_RESPONSE);
            let _ = stream.shutdown(std::net::Shutdown::Both);
            return;
        }

        let entry = self.connections.vacant_entry();
        let token = Token(entry.key());
        let mut connection = Connection::new(
            token,
            stream,
            Arc::clone(&self.config.resource_dir),
            Arc::clone(&self.db_pool),
            Arc::clone(&self.logger),
        );
        if connection
            .register(self.poll.registry(), Interest::READABLE)
            .is_err()
        {
            log_error!(self.logger, "failed to register new connection");
            return;
        }
        entry.insert(Arc::new(Mutex::new(connection)));
        if let Some(timeout) = self.config.connection_timeout {
            let expired = Arc::clone(&self.expired_tokens);
            self.timer.add(
                token.0,
                timeout,
                Box::new(move || expired.lock().unwrap().push(token)),
            );
        }
        log_info!(self.logger, "accepted connection from {addr}, token {}", token.0);
    }

    fn dispatch(&mut self, event: &mio::event::Event) {
        let token = event.token();
        if let Some(connection) = self.connections.get(token.0) {
            if self
                .workers
                .send(Event {
                    connection: Arc::clone(connection),
                    event: event.clone(),
                })
                .is_err()
            {
                log_error!(self.logger, "all workers have exited");
            }
        }
    }

    fn event_complete(&mut self, token: Token) {
        let Some(connection) = self.connections.get(token.0) else {
            return;
        };
        let mut locked = connection.lock().unwrap_or_else(|p| p.into_inner());
        if locked.is_closed() {
            let _ = locked.deregister(self.poll.registry());
            drop(locked);
            self.connections.try_remove(token.0);
            self.timer.cancel(token.0);
            return;
        }
        let interest = locked.desired_interest();
        if locked.reregister(self.poll.registry(), interest).is_err() {
            log_warn!(self.logger, "reregister failed for token {}", token.0);
        }
        drop(locked);
        if let Some(timeout) = self.config.connection_timeout {
            self.timer.adjust(token.0, timeout);
        }
    }

    fn close_token(&mut self, token: Token) {
        if let Some(connection) = self.connections.get(token.0) {
            let mut locked = connection.lock().unwrap_or_else(|p| p.into_inner());
            locked.close();
            let _ = locked.deregister(self.poll.registry());
            drop(locked);
            self.connections.try_remove(token.0);
        }
    }

    fn drain_expired(&mut self) {
        let expired: Vec<Token> = self.expired_tokens.lock().unwrap().drain(..).collect();
        for token in expired {
            log_info!(self.logger, "connection {} timed out", token.0);
            self.close_token(token);
        }
    }

    /// Runs the event loop. Returns only on a fatal poll error.
    pub fn run(&mut self) -> io::Result<()> {
        let mut events = Events::with_capacity(self.num_events);
        loop {
            let timeout = if self.config.connection_timeout.is_some() {
                self.timer.tick()
            } else {
                None
            };
            self.drain_expired();

            match self.poll.poll(&mut events, timeout) {
                Ok(()) => {}
                Err(ref e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }

            for event in events.iter() {
                match event.token() {
                    LISTEN_TOKEN => {
                        if let Err(e) = self.accept() {
                            log_error!(self.logger, "accept failed: {e}");
                        }
                    }
                    WAKE_TOKEN => loop {
                        match self.completions.try_recv() {
                            Ok(token) => self.event_complete(token),
                            Err(TryRecvError::Empty) => break,
                            Err(TryRecvError::Disconnected) => return Ok(()),
                        }
                    },
                    _ => self.dispatch(event),
                }
            }
        }
    }
}
