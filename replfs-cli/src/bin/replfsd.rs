//! ReplFS replica server daemon (`spec.md` §6).
//!
//! With no arguments the defaults are port 44018, 10% simulated drop, and
//! mount path `./`; every flag can also be given explicitly.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;

use replfs_server::{ServerError, ServerInstance};
use replfs_transport::{EventSource, MulticastChannel};

#[derive(Parser)]
#[command(name = "replfsd", about = "ReplFS replica server daemon")]
struct Args {
    /// Multicast group port.
    #[arg(long, default_value_t = 44_018)]
    port: u16,

    /// Directory committed files are materialized under.
    #[arg(long, default_value = "./")]
    mount: PathBuf,

    /// Simulated outbound packet drop percentage (0..100).
    #[arg(long, default_value_t = 10)]
    drop: u8,
}

fn main() -> ExitCode {
    env_logger::init();
    let args = Args::parse();

    let mut server = match ServerInstance::new(&args.mount) {
        Ok(server) => server,
        Err(ServerError::MountInUse(path)) => {
            eprintln!("machine already in use: {path:?} already exists");
            return ExitCode::from(255);
        }
        Err(e) => {
            eprintln!("failed to start server: {e}");
            return ExitCode::FAILURE;
        }
    };

    let channel = match MulticastChannel::new(args.port, args.drop) {
        Ok(channel) => channel,
        Err(e) => {
            eprintln!("failed to join multicast group: {e}");
            return ExitCode::FAILURE;
        }
    };

    ctrlc::set_handler(move || {
        log::info!("received interrupt, shutting down");
        std::process::exit(0);
    })
    .expect("failed to install signal handler");

    log::info!(
        "replfsd listening on port {} (drop {}%), mount {:?}, server id {}",
        args.port,
        args.drop,
        args.mount,
        server.server_id()
    );

    let mut events = EventSource::new(channel);
    server.run(&mut events);
}
