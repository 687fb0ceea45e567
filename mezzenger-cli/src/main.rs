// Copyright 2024 - developers of the `mezzenger` project.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Broker binary: parses flags, wires up logging and persistence, and runs
//! a [`mezzenger_broker::BrokerRunner`] to completion.

use std::net::IpAddr;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use mezzenger_broker::{BrokerConfig, BrokerError};
use mezzenger_persist::{FilePersistence, Persistence};

#[derive(Debug, Parser)]
#[command(author, version, about = "Mezzenger topic-based publish/subscribe broker", long_about = None)]
struct Arguments {
    /// Address both endpoints bind to.
    #[arg(long, default_value = "127.0.0.1")]
    bind: IpAddr,

    /// Port the fan-out publish endpoint listens on.
    #[arg(long, default_value_t = 7201)]
    pub_port: u16,

    /// Port the request/reply inbound endpoint listens on.
    #[arg(long, default_value_t = 7202)]
    recv_port: u16,

    /// Optional whole-table snapshot file; omit to keep the retention table
    /// purely in memory.
    #[arg(long)]
    persist_file: Option<PathBuf>,

    /// Raises per-message trace logging from `debug` to `trace`.
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    // Making errors (unbalanced blocks) inside a `tokio::main` produces confusing diagnostics.
    // So the "real main" is wrapped by this.
    match real_main().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            log::error!("{err}");
            ExitCode::FAILURE
        }
    }
}

async fn real_main() -> Result<(), BrokerError> {
    let args = Arguments::parse();

    let level = if args.verbose { log::LevelFilter::Trace } else { log::LevelFilter::Info };
    env_logger::Builder::from_default_env().filter_level(level).init();

    log::info!("starting with {args:?}");

    let config = BrokerConfig {
        bind: args.bind,
        pub_port: args.pub_port,
        recv_port: args.recv_port,
        persist_file: args.persist_file.clone(),
        verbose: args.verbose,
    };

    let persistence: Option<Arc<dyn Persistence>> = args
        .persist_file
        .map(|path| Arc::new(FilePersistence::new(path)) as Arc<dyn Persistence>);

    let (_handle, runner) = mezzenger_broker::new(config, persistence);
    runner.run().await
}
