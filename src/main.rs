use std::io;
use std::net::SocketAddr;
use std::os::unix::io::AsRawFd;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use crossbeam_channel::unbounded;
use mio::net::{TcpListener as MioTcpListener, TcpStream as MioTcpStream};

use edgeweb::config::Config;
use edgeweb::db::DbPool;
use edgeweb::logging::Logger;
use edgeweb::mux::TriggerMode;
use edgeweb::server::{Server, ServerConfig};
use edgeweb::worker_pool::Worker;
use edgeweb::{log_error, log_info};

/// Static-file and login-form HTTP/1.1 server.
#[derive(Parser, Debug)]
#[command(name = "edgewebd", version, about)]
struct Cli {
    /// Path to the server's YAML configuration file.
    #[arg(long, short = 'c', default_value = "config.yaml")]
    config: PathBuf,

    /// Overrides the configured listening port.
    #[arg(long)]
    port: Option<u16>,

    /// Overrides the configured log level (debug|info|warn|error).
    #[arg(long)]
    log_level: Option<String>,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("edgewebd: {e}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    let mut config = Config::load(&cli.config)?;
    if let Some(port) = cli.port {
        config.port = port;
    }
    if let Some(level) = &cli.log_level {
        config.log.level = level.clone();
    }
    let logger = Logger::new(&config.log, "edgewebd")?;
    log_info!(logger, "loaded configuration from {}", cli.config.display());

    let db_pool = DbPool::new(&config.db, &logger)?;

    let addr: SocketAddr = ([0, 0, 0, 0], config.port).into();
    let listener = MioTcpListener::bind(addr)?;
    set_linger(&listener, config.so_linger)?;
    log_info!(logger, "listening on {addr}");

    let trigger_mode = TriggerMode::from_u8(config.trigger_mode);
    let connection_timeout = if config.connection_timeout_ms > 0 {
        Some(Duration::from_millis(config.connection_timeout_ms))
    } else {
        None
    };

    let (event_tx, event_rx) = unbounded();
    let (completion_tx, completion_rx) = unbounded();

    let server_config = ServerConfig {
        trigger_mode,
        connection_timeout,
        resource_dir: Arc::new(config.resource_dir.clone()),
    };

    let mut server: Server<MioTcpListener, MioTcpStream> = Server::new(
        listener,
        event_tx,
        completion_rx,
        server_config,
        Arc::clone(&db_pool),
        Arc::clone(&logger),
    )?;
    let waker = server.waker();

    let handles: Vec<_> = (0..config.worker_threads.max(1))
        .map(|i| {
            let events = event_rx.clone();
            let completions = completion_tx.clone();
            let waker = Arc::clone(&waker);
            let conn_et = trigger_mode.conn_et;
            std::thread::Builder::new()
                .name(format!("edgeweb-worker-{i}"))
                .spawn(move || Worker::new(events, completions, waker, conn_et).run())
        })
        .collect::<io::Result<_>>()?;
    drop(event_rx);
    drop(completion_tx);

    if let Err(e) = server.run() {
        log_error!(logger, "reactor loop exited: {e}");
    }

    for handle in handles {
        let _ = handle.join();
    }
    Ok(())
}

/// Sets `SO_LINGER` on the listening socket; mio doesn't expose this
/// option directly.
fn set_linger(listener: &MioTcpListener, enabled: bool) -> io::Result<()> {
    let ling = libc::linger {
        l_onoff: enabled as libc::c_int,
        l_linger: 1,
    };
    let ret = unsafe {
        libc::setsockopt(
            listener.as_raw_fd(),
            libc::SOL_SOCKET,
            libc::SO_LINGER,
            &ling as *const libc::linger as *const libc::c_void,
            std::mem::size_of::<libc::linger>() as libc::socklen_t,
        )
    };
    if ret != 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}
