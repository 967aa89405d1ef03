//! Per-connection state: the read buffer, the in-progress request, and the
//! response currently being drained onto the wire.

use std::io::{self, ErrorKind, Read, Write};
use std::os::unix::io::AsRawFd;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use mio::event::Source;
use mio::{Interest, Registry, Token};

use crate::buffer::Buffer;
use crate::db::DbPool;
use crate::http::{self, Request};
use crate::logging::Logger;
use crate::net::tcp_stream::TcpStream;

const ET_WRITE_HIGH_WATER: usize = 10_240;
const READ_CHUNK: usize = 4096;

/// What a write attempt accomplished.
#[derive(Debug, PartialEq, Eq)]
pub enum WriteOutcome {
    /// The whole response went out.
    Done,
    /// The kernel send buffer is full; wait for the next writable event.
    WouldBlock,
    /// Level-triggered mode stopped early because less than the
    /// high-water mark remained; the next writable event will continue.
    Partial,
}

/// One accepted TCP connection and the HTTP exchange in progress on it.
pub struct Connection<S: TcpStream + Read + Write + Source> {
    token: Token,
    stream: S,
    read_buf: Buffer,
    request: Request,
    response: Option<http::Response>,
    header_sent: usize,
    body_sent: usize,
    closed: bool,
    keep_alive: bool,
    last_active: Instant,
    resource_dir: Arc<PathBuf>,
    db_pool: Arc<DbPool>,
    logger: Arc<Logger>,
}

impl<S: TcpStream + Read + Write + Source + AsRawFd> Connection<S> {
    pub fn new(
        token: Token,
        stream: S,
        resource_dir: Arc<PathBuf>,
        db_pool: Arc<DbPool>,
        logger: Arc<Logger>,
    ) -> Self {
        Self {
            token,
            stream,
            read_buf: Buffer::new(4096),
            request: Request::new(),
            response: None,
            header_sent: 0,
            body_sent: 0,
            closed: false,
            keep_alive: false,
            last_active: Instant::now(),
            resource_dir,
            db_pool,
            logger,
        }
    }

    pub fn token(&self) -> Token {
        self.token
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn keep_alive(&self) -> bool {
        self.keep_alive
    }

    pub fn last_active(&self) -> Instant {
        self.last_active
    }

    pub fn touch(&mut self) {
        self.last_active = Instant::now();
    }

    pub fn close(&mut self) {
        self.closed = true;
    }

    /// `WRITABLE` while a response is queued to go out, `READABLE`
    /// otherwise — mirrors the original's `EPOLLOUT`-after-`process()`
    /// dispatch.
    pub fn desired_interest(&self) -> Interest {
        if self.response.is_some() {
            Interest::WRITABLE
        } else {
            Interest::READABLE
        }
    }

    /// Resets parsing/response state once a keep-alive response has fully
    /// drained, ready for the connection's next request.
    fn reset_for_next_request(&mut self) {
        self.request = Request::new();
        self.response = None;
        self.header_sent = 0;
        self.body_sent = 0;
    }

    /// Reads as much as the stream currently has. In edge-triggered mode
    /// this loops until `WouldBlock`; in level-triggered mode it reads
    /// once per call, matching `HttpConn::read`.
    pub fn read(&mut self, is_et: bool) -> io::Result<usize> {
        let mut total = 0usize;
        loop {
            self.read_buf.ensure_writable(READ_CHUNK);
            let ptr = self.read_buf.write_ptr();
            let len = self.read_buf.writable_len();
            // SAFETY: ensure_writable just guaranteed `len` writable bytes
            // starting at `ptr`; nothing else borrows the buffer here.
            let slice = unsafe { std::slice::from_raw_parts_mut(ptr, len) };
            match self.stream.read(slice) {
                Ok(0) => {
                    self.closed = true;
                    break;
                }
                Ok(n) => {
                    self.read_buf.has_written(n);
                    total += n;
                    if !is_et {
                        break;
                    }
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
        Ok(total)
    }

    /// Advances request parsing and, once a full request has arrived,
    /// builds the response. Returns `true` once a response is ready to be
    /// written.
    pub fn process(&mut self) -> bool {
        if self.response.is_some() {
            return true;
        }
        if self.read_buf.readable_len() == 0 {
            return false;
        }
        match self.request.parse(&mut self.read_buf, &self.db_pool, &self.logger) {
            Ok(true) => {
                self.keep_alive = self.request.keep_alive();
                self.response = Some(http::response::build(
                    &self.resource_dir,
                    &self.request.path,
                    self.keep_alive,
                    &self.logger,
                ));
                true
            }
            Ok(false) => false,
            Err(_) => {
                self.keep_alive = false;
                self.response = Some(http::response::build(
                    &self.resource_dir,
                    "/400.html",
                    false,
                    &self.logger,
                ));
                true
            }
        }
    }

    /// Writes as much of the current response as the socket accepts right
    /// now via a gathered `writev` over the header bytes and the mapped
    /// file body.
    pub fn write(&mut self, is_et: bool) -> io::Result<WriteOutcome> {
        loop {
            let Some(response) = self.response.as_ref() else {
                return Ok(WriteOutcome::Done);
            };
            let header = &response.header[self.header_sent..];
            let body: &[u8] = match &response.body {
                Some(map) => &map[self.body_sent..],
                None => &[],
            };
            if header.is_empty() && body.is_empty() {
                if self.keep_alive {
                    self.reset_for_next_request();
                }
                return Ok(WriteOutcome::Done);
            }

            let iovecs = [
                libc::iovec {
                    iov_base: header.as_ptr() as *mut libc::c_void,
                    iov_len: header.len(),
                },
                libc::iovec {
                    iov_base: body.as_ptr() as *mut libc::c_void,
                    iov_len: body.len(),
                },
            ];
            let (iov_ptr, iovcnt): (*const libc::iovec, libc::c_int) = if header.is_empty() {
                (&iovecs[1] as *const libc::iovec, 1)
            } else {
                (iovecs.as_ptr(), 2)
            };
            let fd = self.stream.as_raw_fd();
            // SAFETY: iov_ptr/iovcnt describe `iovcnt` iovec entries
            // pointing at the response's own header buffer and mmap, both
            // alive for the duration of this syscall.
            let n = unsafe { libc::writev(fd, iov_ptr, iovcnt) };
            if n < 0 {
                let err = io::Error::last_os_error();
                return match err.kind() {
                    ErrorKind::WouldBlock => Ok(WriteOutcome::WouldBlock),
                    ErrorKind::Interrupted => continue,
                    _ => Err(err),
                };
            }

            let mut written = n as usize;
            let from_header = written.min(header.len());
            self.header_sent += from_header;
            written -= from_header;
            self.body_sent += written;

            let remaining = self
                .response
                .as_ref()
                .expect("checked above")
                .remaining_len(self.header_sent, self.body_sent);
            if remaining == 0 {
                if self.keep_alive {
                    self.reset_for_next_request();
                }
                return Ok(WriteOutcome::Done);
            }
            if !is_et && remaining <= ET_WRITE_HIGH_WATER {
                return Ok(WriteOutcome::Partial);
            }
        }
    }

    pub fn register(&mut self, registry: &Registry, interest: Interest) -> io::Result<()> {
        registry.register(&mut self.stream, self.token, interest)
    }

    pub fn reregister(&mut self, registry: &Registry, interest: Interest) -> io::Result<()> {
        registry.reregister(&mut self.stream, self.token, interest)
    }

    pub fn deregister(&mut self, registry: &Registry) -> io::Result<()> {
        registry.deregister(&mut self.stream)
    }
}
