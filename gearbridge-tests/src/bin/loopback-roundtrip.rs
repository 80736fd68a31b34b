// SPDX-License-Identifier: MIT
//
// Author: Johannes Leupolz <dev@leupolz.eu>
//
// Runs one task through the bridge against the in-process job server and
// prints the host calls it caused as json.

use std::io;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use gearbridge::{BridgeConfig, Cell, Gearbridge, HostArg, PriorityArg};
use gearbridge_tests::scripted_host::ScriptedHost;
use gearman_lowlevel::loopback::LoopbackLibrary;
use gearman_lowlevel::{Priority, ReturnCode};

#[derive(Debug, Parser)]
#[command(author, version, about)]
struct Args {
    #[arg(long, default_value = "localhost")]
    host: String,

    #[arg(long, default_value_t = 4730)]
    port: u16,

    /// Name of the worker function.
    #[arg(long, default_value = "reverse")]
    function: String,

    #[arg(long, default_value = "hello")]
    workload: String,

    #[arg(long, value_enum, default_value_t = PriorityArg::Normal)]
    priority: PriorityArg,

    /// Milliseconds to wait for the result.
    #[arg(long, default_value_t = 5000)]
    timeout: u64,

    /// Bridge settings as json, overridden by the flags above.
    #[arg(long)]
    config: Option<String>,
}

fn other_error(e: impl std::fmt::Display) -> io::Error {
    io::Error::new(io::ErrorKind::Other, e.to_string())
}

fn main() -> io::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let mut config = match &args.config {
        Some(json) => BridgeConfig::from_json(json).map_err(other_error)?,
        None => BridgeConfig::default(),
    };
    config.default_priority = args.priority;
    config.client_timeout_ms = Some(args.timeout);

    let library = Arc::new(LoopbackLibrary::new());
    let _server = library.listen(&args.host, args.port);
    let bridge = Arc::new(Gearbridge::new(library, config));
    let host = ScriptedHost::new(1);
    let port = Cell::from(args.port);

    let worker = host
        .call_native(&bridge, "GearmanWorker_Create", &[])
        .map_err(other_error)?;
    let address = host.string(&args.host);
    host.call_native(&bridge, "GearmanWorker_AddServer", &[worker, address, port])
        .map_err(other_error)?;

    let worker_bridge = bridge.clone();
    let worker_host = host.clone();
    let reverse = host.register(&args.function, move |frame| match frame {
        [HostArg::Handle(job), HostArg::Bytes(workload), _] => {
            let reversed: String = String::from_utf8_lossy(workload).chars().rev().collect();
            let data = worker_host.string(&reversed);
            let send = [job.as_cell(), data, 2];
            match worker_host.call_native(&worker_bridge, "GearmanJob_Send", &send) {
                Ok(ret) => ret,
                Err(e) => {
                    eprintln!("sending the result failed: {}", e);
                    ReturnCode::FAIL.as_cell()
                }
            }
        }
        _ => ReturnCode::FAIL.as_cell(),
    });
    let name = host.string(&args.function);
    host.call_native(
        &bridge,
        "GearmanWorker_AddFunction",
        &[worker, name, reverse.0 as Cell],
    )
    .map_err(other_error)?;

    let client = host
        .call_native(&bridge, "GearmanClient_Create", &[])
        .map_err(other_error)?;
    let address = host.string(&args.host);
    host.call_native(&bridge, "GearmanClient_AddServer", &[client, address, port])
        .map_err(other_error)?;

    let complete = host.register("complete", |_| 0);
    let function = host.string(&args.function);
    let workload = host.string(&args.workload);
    let priority = Priority::from(args.priority).as_cell();
    let task = host
        .call_native(
            &bridge,
            "GearmanClient_AddTask",
            &[client, function, workload, complete.0 as Cell, priority],
        )
        .map_err(other_error)?;
    let fail = host.register("fail", |_| 0);
    host.call_native(&bridge, "GearmanTask_SetFailCallback", &[task, fail.0 as Cell])
        .map_err(other_error)?;

    let timeout = Duration::from_millis(args.timeout);
    let finished = host.wait_for("complete", 1, timeout) || !host.calls_to("fail").is_empty();
    if !finished {
        eprintln!("no result within {} ms", args.timeout);
    }

    println!("{}", host.to_json().map_err(other_error)?);
    bridge.unload();
    Ok(())
}
