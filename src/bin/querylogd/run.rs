// Copyright 2022 Matthew Ingwersen.
//
// Licensed under the Apache License, Version 2.0 (the "License"); you
// may not use this file except in compliance with the License. You may
// obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or
// implied. See the License for the specific language governing
// permissions and limitations under the License.

//! Implements the `run` command (i.e., running the daemon).

use std::fmt::Write;
use std::fs;
use std::path::PathBuf;
use std::process;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use anyhow::{Context, Result};
use env_logger::Env;
use log::{error, info, warn};
use signal_hook::consts::signal::{SIGINT, SIGTERM};
use signal_hook::iterator::Signals;

use querylog::config::{self, ListenerConfig};
use querylog::io::BlockingIoProvider;
use querylog::server::LogSink;
use querylog::thread::ThreadGroup;

use crate::args::RunArgs;

/// Runs the daemon.
pub fn run(args: RunArgs) {
    let default_level = if args.debug { "debug" } else { "info" };
    env_logger::init_from_env(Env::new().default_filter_or(default_level));

    if let Err(e) = try_running(args) {
        let mut message = String::from("Failed to run:");
        for (i, cause) in e.chain().enumerate() {
            write!(message, "\n[{}] {}", i + 1, cause).unwrap();
        }
        message.push_str("\nExiting with failure.");
        error!("{}", message);
        process::exit(1);
    }
    info!("Exiting with success.");
}

fn try_running(args: RunArgs) -> Result<()> {
    info!(
        "querylog daemon v{}.{}.{} starting.",
        env!("CARGO_PKG_VERSION_MAJOR"),
        env!("CARGO_PKG_VERSION_MINOR"),
        env!("CARGO_PKG_VERSION_PATCH"),
    );

    // Resolve the listener set. An unreadable address file is fatal;
    // invalid lines within a readable one are skipped (with warnings)
    // by the parser.
    let addresses = match args.addresses {
        Some(ref path) => {
            info!("Loading listener addresses from {}.", path);
            let text = fs::read_to_string(path.as_path())
                .with_context(|| format!("failed to read the address file {}", path))?;
            config::parse_listener_addresses(&text)
        }
        None => Vec::new(),
    };
    let listener_config = ListenerConfig::new(addresses, args.port.get());
    info!(
        "Listening on {} address(es), port {}.",
        listener_config.addresses().len(),
        listener_config.port(),
    );

    // Bind all sockets up front: a port already in use or a missing
    // privilege should fail fast, before we touch the PID file.
    let provider = BlockingIoProvider::bind(&listener_config).context("failed to bind sockets")?;

    if !BlockingIoProvider::SUPPORTS_GRACEFUL_SHUTDOWN {
        warn!(
            "Graceful shutdown is not supported on this target; \
             in-flight TCP accepts may be cut off at exit."
        );
    }

    // Set up signal handling before going live, so a prompt SIGTERM
    // can't slip past us.
    let mut signals = set_up_signal_handling().context("failed to set up signal handling")?;

    let pid_file = match args.pid_file {
        Some(ref path) => {
            Some(PidFile::create(path.as_path().to_owned()).context("failed to write the PID file")?)
        }
        None => None,
    };

    // Start the listener threads.
    let thread_group = ThreadGroup::new();
    let sink = Arc::new(LogSink);
    let context = ServerContext {
        thread_group: thread_group.clone(),
        pid_file,
    };
    if let Err(e) = provider.start(&sink, &thread_group) {
        context.shut_down();
        return Err(e).context("failed to start the listeners");
    }
    info!("Set-up is complete; logging queries.");

    // Wait for a termination signal.
    for signal in signals.forever() {
        match signal {
            s @ (SIGINT | SIGTERM) => {
                let name = match s {
                    SIGINT => "SIGINT",
                    SIGTERM => "SIGTERM",
                    _ => unreachable!(),
                };
                info!("Received {}; shutting down.", name);
                break;
            }
            _ => unreachable!(),
        }
    }

    context.shut_down();
    Ok(())
}

fn set_up_signal_handling() -> Result<Signals> {
    let term_signals = &[SIGINT, SIGTERM];
    let already_terminating = Arc::new(AtomicBool::new(false));

    // This sets up signal handlers to exit immediately if a second
    // termination signal arrives before the process finishes shutting
    // down gracefully.
    for sig in term_signals {
        signal_hook::flag::register_conditional_shutdown(*sig, 1, already_terminating.clone())?;
        signal_hook::flag::register(*sig, already_terminating.clone())?;
    }

    Signals::new(term_signals).map_err(Into::into)
}

////////////////////////////////////////////////////////////////////////
// SERVER CONTEXT                                                     //
////////////////////////////////////////////////////////////////////////

/// The daemon's process-wide state: the thread group its listeners run
/// in and the PID file to clean up. There is exactly one, owned by
/// [`try_running`], and [`ServerContext::shut_down`] consumes it; no
/// shutdown step lives in ambient global state.
struct ServerContext {
    thread_group: Arc<ThreadGroup>,
    pid_file: Option<PidFile>,
}

impl ServerContext {
    /// Performs an orderly shutdown: stops the listener threads (and
    /// waits for them, where the target supports bounded blocking
    /// operations), then removes the PID file.
    fn shut_down(self) {
        self.thread_group.shut_down();
        if BlockingIoProvider::SUPPORTS_GRACEFUL_SHUTDOWN {
            self.thread_group.await_shutdown();
        }
        if let Some(pid_file) = self.pid_file {
            pid_file.remove();
        }
        info!("Shutdown complete.");
    }
}

////////////////////////////////////////////////////////////////////////
// PID FILES                                                          //
////////////////////////////////////////////////////////////////////////

/// A PID file held for the lifetime of the daemon.
struct PidFile {
    path: PathBuf,
}

impl PidFile {
    /// Writes the current process ID to `path`.
    fn create(path: PathBuf) -> std::io::Result<Self> {
        fs::write(&path, format!("{}\n", process::id()))?;
        Ok(Self { path })
    }

    /// Removes the PID file. Failure to remove is logged, not fatal:
    /// the process is exiting either way.
    fn remove(self) {
        if let Err(e) = fs::remove_file(&self.path) {
            warn!(
                "failed to remove the PID file {}: {}",
                self.path.display(),
                e
            );
        }
    }
}
