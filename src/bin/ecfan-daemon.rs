use clap::Parser;
use ecfan::server::Server;
use ecfan::service::{self, Service, ServiceOptions};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use tracing::{error, info};

/// Set by the signal handler; both the control loop and the server poll it.
static QUIT: AtomicBool = AtomicBool::new(false);

#[derive(Parser, Debug)]
#[command(name = "ecfan-daemon", about = "Notebook fan control daemon")]
struct Opts {
    /// Directory containing notebook model configuration files
    #[clap(long, default_value = "/etc/ecfan/configs")]
    config_dir: PathBuf,
    /// Path of the persisted service configuration
    #[clap(long, default_value = "/etc/ecfan/service.json")]
    service_config: PathBuf,
    /// Control socket path
    #[clap(long, default_value = ecfan::protocol::SOCKET_PATH)]
    socket: PathBuf,
    /// Never write to the embedded controller
    #[clap(long)]
    readonly: bool,
    /// Log every EC register access
    #[clap(long)]
    debug_ec: bool,
}

extern "C" fn handle_signal(_signal: libc::c_int) {
    QUIT.store(true, Ordering::SeqCst);
}

fn main() {
    // Initialize tracing subscriber for structured logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(true)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .init();

    let opts = Opts::parse();
    info!("Starting ecfan daemon");

    // EC register access needs root; read-only runs can stay unprivileged.
    if !opts.readonly && unsafe { libc::geteuid() } != 0 {
        error!("Daemon must be run as root to access the embedded controller");
        std::process::exit(1);
    }

    unsafe {
        libc::signal(libc::SIGINT, handle_signal as libc::sighandler_t);
        libc::signal(libc::SIGTERM, handle_signal as libc::sighandler_t);
    }

    let options = ServiceOptions {
        config_dir: opts.config_dir,
        service_config_path: opts.service_config,
        read_only: opts.readonly,
        debug_ec: opts.debug_ec,
    };
    let service = match Service::init(&options) {
        Ok(service) => Arc::new(Mutex::new(service)),
        Err(err) => {
            error!("Service initialization failed: {:#}", err);
            std::process::exit(1);
        }
    };

    let server = match Server::bind(&opts.socket, Arc::clone(&service)) {
        Ok(server) => server,
        Err(err) => {
            error!("Failed to start control server: {:#}", err);
            service.lock().unwrap().cleanup();
            std::process::exit(1);
        }
    };
    let server_thread = thread::spawn(move || server.run(&QUIT));

    let result = service::run_loop(&service, &QUIT);

    QUIT.store(true, Ordering::SeqCst);
    if let Err(err) = server_thread.join() {
        error!("Server thread panicked: {:?}", err);
    }
    service.lock().unwrap().cleanup();

    match result {
        Ok(()) => info!("Shutdown complete"),
        Err(err) => {
            error!("{:#}", err);
            std::process::exit(1);
        }
    }
}
