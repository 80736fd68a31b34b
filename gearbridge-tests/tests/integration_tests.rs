// SPDX-License-Identifier: MIT
//
// Author: Johannes Leupolz <dev@leupolz.eu>

use std::sync::Arc;
use std::time::{Duration, Instant};

use gearbridge::{
    BridgeConfig, BridgeError, Cell, FuncId, Gearbridge, Handle, HandleError, HostArg,
};
use gearbridge_tests::scripted_host::ScriptedHost;
use gearbridge_tests::test_log::LoggedArg;
use gearman_lowlevel::loopback::{LoopbackLibrary, LoopbackServer};
use gearman_lowlevel::{ClientConnection, Priority, ReturnCode};

const WAIT: Duration = Duration::from_secs(5);
const PORT: Cell = 4730;
const COMPLETE: Cell = 2;
const EXCEPTION: Cell = 3;

fn eventually(condition: impl Fn() -> bool) -> bool {
    let deadline = Instant::now() + WAIT;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    condition()
}

struct Setup {
    library: Arc<LoopbackLibrary>,
    server: LoopbackServer,
    bridge: Arc<Gearbridge>,
    host: Arc<ScriptedHost>,
}

fn setup() -> Setup {
    let _ = env_logger::builder().is_test(true).try_init();
    let library = Arc::new(LoopbackLibrary::new());
    let server = library.listen("localhost", 4730);
    let config = BridgeConfig {
        client_timeout_ms: Some(5000),
        ..BridgeConfig::default()
    };
    Setup {
        library: library.clone(),
        server,
        bridge: Arc::new(Gearbridge::new(library, config)),
        host: ScriptedHost::new(1),
    }
}

impl Setup {
    fn native(&self, name: &str, args: &[Cell]) -> Result<Cell, BridgeError> {
        self.host.call_native(&self.bridge, name, args)
    }

    fn client(&self) -> Cell {
        let client = self.native("GearmanClient_Create", &[]).unwrap();
        let localhost = self.host.string("localhost");
        let ret = self
            .native("GearmanClient_AddServer", &[client, localhost, PORT])
            .unwrap();
        assert_eq!(ret, 0);
        client
    }

    fn worker(&self) -> Cell {
        let worker = self.native("GearmanWorker_Create", &[]).unwrap();
        let localhost = self.host.string("localhost");
        let ret = self
            .native("GearmanWorker_AddServer", &[worker, localhost, PORT])
            .unwrap();
        assert_eq!(ret, 0);
        worker
    }

    fn add_function(&self, worker: Cell, name: &str, callback: FuncId) -> Cell {
        let name = self.host.string(name);
        self.native(
            "GearmanWorker_AddFunction",
            &[worker, name, callback.0 as Cell],
        )
        .unwrap()
    }

    /// Worker function answering every job with `response` carrying its workload.
    fn echo_function(&self, name: &str, response: Cell) -> FuncId {
        let bridge = self.bridge.clone();
        let host = self.host.clone();
        self.host.register(name, move |args| match args {
            [HostArg::Handle(job), HostArg::Bytes(workload), HostArg::Cell(_)] => {
                let data = host.string(&String::from_utf8_lossy(workload));
                host.call_native(&bridge, "GearmanJob_Send", &[job.as_cell(), data, response])
                    .map_or(-1, |_| ReturnCode::SUCCESS.as_cell())
            }
            _ => ReturnCode::FAIL.as_cell(),
        })
    }

    fn add_task(&self, client: Cell, function: &str, workload: &str, complete: Cell) -> Cell {
        let function = self.host.string(function);
        let workload = self.host.string(workload);
        self.native(
            "GearmanClient_AddTask",
            &[client, function, workload, complete],
        )
        .unwrap()
    }
}

//
// 1. A workload makes the round trip through a worker of the same bridge
//
#[test]
fn test_task_roundtrip_delivers_payload() {
    let s = setup();
    let worker = s.worker();
    let echo = s.echo_function("echo", COMPLETE);
    assert_eq!(s.add_function(worker, "echo", echo), 0);

    let complete = s.host.register("complete", |_| 0);
    let task = s.add_task(s.client(), "echo", "hello", complete.0 as Cell);
    assert!(task > 0);

    assert!(s.host.wait_for("complete", 1, WAIT));
    let call = &s.host.calls_to("complete")[0];
    assert_eq!(
        call.args,
        vec![
            LoggedArg::Handle(task as u32),
            LoggedArg::Bytes(b"hello".to_vec()),
            LoggedArg::Cell(5)
        ]
    );
    assert!(call.thread.starts_with("gearman-dispatch-"));
    let echo_call = &s.host.calls_to("echo")[0];
    assert!(echo_call.thread.starts_with("gearman-worker-"));

    // the task handle is released with its terminal event
    let plugin = s.host.as_plugin();
    assert!(eventually(|| s
        .bridge
        .task(&plugin, Handle::from_cell(task))
        .is_err()));
    s.bridge.unload();
}

//
// 2. An out-of-range port is refused before anything else happens
//
#[test]
fn test_port_out_of_range() {
    let s = setup();
    let client = s.native("GearmanClient_Create", &[]).unwrap();
    let worker = s.native("GearmanWorker_Create", &[]).unwrap();
    // 999 is no valid string address: the port check comes first
    for (native, handle) in [
        ("GearmanClient_AddServer", client),
        ("GearmanWorker_AddServer", worker),
    ] {
        for port in [70000, -1] {
            assert!(matches!(
                s.native(native, &[handle, 999, port]),
                Err(BridgeError::InvalidArgument(_))
            ));
        }
    }
    s.bridge.unload();
}

//
// 3. A worker with several functions still runs a single thread
//
#[test]
fn test_one_worker_thread_per_worker() {
    let s = setup();
    let worker = s.worker();
    let first = s.echo_function("first", COMPLETE);
    let second = s.echo_function("second", COMPLETE);
    assert_eq!(s.add_function(worker, "first", first), 0);
    assert_eq!(s.add_function(worker, "second", second), 0);

    let plugin = s.host.as_plugin();
    let context = s.bridge.worker(&plugin, Handle::from_cell(worker)).unwrap();
    assert_eq!(context.threads_started(), 1);
    let mut functions = context.functions();
    functions.sort();
    assert_eq!(functions, vec!["first".to_string(), "second".to_string()]);

    // both functions are served by that thread
    let done = s.host.register("done", |_| 0);
    let client = s.client();
    s.add_task(client, "first", "a", done.0 as Cell);
    s.add_task(client, "second", "b", done.0 as Cell);
    assert!(s.host.wait_for("done", 2, WAIT));
    s.bridge.unload();
}

//
// 4. A handle of one type is no handle of another
//
#[test]
fn test_handle_type_is_checked() {
    let s = setup();
    let client = s.native("GearmanClient_Create", &[]).unwrap();
    let localhost = s.host.string("localhost");

    let result = s.native("GearmanWorker_AddServer", &[client, localhost, PORT]);
    assert!(matches!(
        result,
        Err(BridgeError::InvalidHandle(HandleError::NotFound { .. }))
    ));
    assert!(matches!(
        s.native("GearmanJob_WorkloadSize", &[client]),
        Err(BridgeError::InvalidHandle(HandleError::NotFound { .. }))
    ));
    assert!(s.native("GearmanClient_AddServer", &[0, localhost, PORT]).is_err());
    s.bridge.unload();
}

//
// 5. A job left in progress is finished later from the host thread
//
#[test]
fn test_deferred_job_is_finished_by_host() {
    let s = setup();
    let worker = s.worker();
    let later = s
        .host
        .register("later", |_| ReturnCode::IN_PROGRESS.as_cell());
    s.add_function(worker, "later", later);

    let client = s.client();
    let complete = s.host.register("complete", |_| 0);
    let task = s.add_task(client, "later", "slow", complete.0 as Cell);
    let status = s.host.register("status", |_| 0);
    s.native("GearmanTask_SetStatusCallback", &[task, status.0 as Cell])
        .unwrap();

    assert!(s.host.wait_for("later", 1, WAIT));
    let job = s.host.calls_to("later")[0].handle(0).unwrap() as Cell;

    let buffer = s.host.buffer();
    assert_eq!(s.native("GearmanJob_Workload", &[job, buffer, 64]).unwrap(), 4);
    assert_eq!(s.host.buffer_contents(buffer).as_deref(), Some("slow"));
    assert_eq!(s.native("GearmanJob_WorkloadSize", &[job]).unwrap(), 4);
    assert_eq!(s.native("GearmanJob_FunctionName", &[job, buffer, 64]).unwrap(), 5);
    assert_eq!(s.host.buffer_contents(buffer).as_deref(), Some("later"));
    // the full length is returned even when the buffer is too small
    assert_eq!(s.native("GearmanJob_FunctionName", &[job, buffer, 3]).unwrap(), 5);
    assert_eq!(s.host.buffer_contents(buffer).as_deref(), Some("la"));

    assert_eq!(s.native("GearmanJob_SendStatus", &[job, 1, 2]).unwrap(), 0);
    assert!(s.host.wait_for("status", 1, WAIT));
    assert_eq!(
        s.host.calls_to("status")[0].args,
        vec![LoggedArg::Handle(task as u32), LoggedArg::Cell(1), LoggedArg::Cell(2)]
    );
    assert!(s.host.calls_to("complete").is_empty());

    let result = s.host.string("done");
    assert_eq!(s.native("GearmanJob_Send", &[job, result, COMPLETE]).unwrap(), 0);
    assert!(s.host.wait_for("complete", 1, WAIT));
    assert_eq!(s.host.calls_to("complete")[0].args[1], LoggedArg::Bytes(b"done".to_vec()));

    assert_eq!(s.native("CloseHandle", &[job]).unwrap(), 1);
    s.bridge.unload();
}

//
// 6. A failing job reaches the fail binding and never the complete binding
//
#[test]
fn test_failed_jobs() {
    let s = setup();
    let client = s.client();
    let complete = s.host.register("complete", |_| 0);
    let fail = s.host.register("fail", |_| 0);
    for (function, workload) in [("raise", "boom"), ("refuse", "x")] {
        let task = s.add_task(client, function, workload, complete.0 as Cell);
        s.native("GearmanTask_SetFailCallback", &[task, fail.0 as Cell])
            .unwrap();
    }

    // the jobs are only taken once the callbacks are in place
    let worker = s.worker();
    let raise = s.echo_function("raise", EXCEPTION);
    s.add_function(worker, "raise", raise);
    let refuse = s.host.register("refuse", |_| ReturnCode::FAIL.as_cell());
    s.add_function(worker, "refuse", refuse);

    assert!(s.host.wait_for("fail", 2, WAIT));
    let mut errors: Vec<LoggedArg> = s
        .host
        .calls_to("fail")
        .into_iter()
        .map(|call| call.args[1].clone())
        .collect();
    errors.sort_by_key(|arg| format!("{:?}", arg));
    assert_eq!(
        errors,
        vec![
            LoggedArg::String("boom".to_string()),
            LoggedArg::String("job failed".to_string())
        ]
    );
    assert!(s.host.calls_to("complete").is_empty());
    s.bridge.unload();
}

//
// 7. A task submitted without servers ends right away
//
#[test]
fn test_task_without_servers_fails() {
    let s = setup();
    let client = s.native("GearmanClient_Create", &[]).unwrap();
    let complete = s.host.register("complete", |_| 0);
    let task = s.add_task(client, "echo", "hello", complete.0 as Cell);

    let plugin = s.host.as_plugin();
    assert!(eventually(|| s
        .bridge
        .task(&plugin, Handle::from_cell(task))
        .is_err()));
    assert!(s.host.calls_to("complete").is_empty());
    s.bridge.unload();
}

//
// 8. The created event carries the server job handle
//
#[test]
fn test_created_callback_sees_job_handle() {
    let s = setup();
    let client = s.client();
    let buffer = s.host.buffer();
    let bridge = s.bridge.clone();
    let host = s.host.clone();
    let created = s.host.register("created", move |args| match args {
        [HostArg::Handle(task)] => host
            .call_native(&bridge, "GearmanTask_JobHandle", &[task.as_cell(), buffer, 64])
            .unwrap_or(-2),
        _ => -3,
    });
    s.native("GearmanClient_SetCreatedCallback", &[client, created.0 as Cell])
        .unwrap();

    // nobody serves this function, the task stays queued
    let task = s.add_task(client, "unserved", "x", 0);
    assert!(s.host.wait_for("created", 1, WAIT));
    let call = &s.host.calls_to("created")[0];
    assert_eq!(call.args, vec![LoggedArg::Handle(task as u32)]);
    assert!(call.result > 0);
    let job_handle = s.host.buffer_contents(buffer).unwrap();
    assert!(job_handle.starts_with("H:localhost:"));
    assert_eq!(call.result as usize, job_handle.len());
    assert_eq!(s.server.queued("unserved"), 1);
    s.bridge.unload();
}

//
// 9. Background jobs are polled through their job handle
//
#[test]
fn test_background_job_status() {
    let s = setup();
    let client = s.client();
    let function = s.host.string("nightly");
    let workload = s.host.string("report");
    let job = s
        .native("GearmanClient_DoBackground", &[client, function, workload])
        .unwrap();
    assert!(job > 0);
    assert_eq!(s.server.queued("nightly"), 1);

    let cells = [s.host.cell(), s.host.cell(), s.host.cell(), s.host.cell()];
    let ret = s
        .native(
            "GearmanClient_JobStatus",
            &[client, job, cells[0], cells[1], cells[2], cells[3]],
        )
        .unwrap();
    assert_eq!(ret, 0);
    let values: Vec<Option<Cell>> = cells.iter().map(|&addr| s.host.cell_value(addr)).collect();
    assert_eq!(values, vec![Some(1), Some(0), Some(0), Some(0)]);

    let buffer = s.host.buffer();
    let len = s.native("GearmanJob_Handle", &[job, buffer, 64]).unwrap();
    assert_eq!(len as usize, s.host.buffer_contents(buffer).unwrap().len());

    // a background job has no payload to read or answer to send
    assert_eq!(s.native("GearmanJob_Workload", &[job, buffer, 64]).unwrap(), -1);
    let data = s.host.string("x");
    assert!(matches!(
        s.native("GearmanJob_Send", &[job, data]),
        Err(BridgeError::InvalidArgument(_))
    ));

    // an empty function name is refused by the library
    let empty = s.host.string("");
    let refused = s
        .native("GearmanClient_DoBackground", &[client, empty, workload])
        .unwrap();
    assert_eq!(refused, 0);
    s.bridge.unload();
}

//
// 10. Handles belong to the plugin that created them and close once
//
#[test]
fn test_close_handle() {
    let s = setup();
    let client = s.native("GearmanClient_Create", &[]).unwrap();

    let stranger = ScriptedHost::new(2);
    assert!(matches!(
        stranger.call_native(&s.bridge, "CloseHandle", &[client]),
        Err(BridgeError::InvalidHandle(HandleError::AccessDenied(_)))
    ));

    assert_eq!(s.native("CloseHandle", &[client]).unwrap(), 1);
    assert!(matches!(
        s.native("CloseHandle", &[client]),
        Err(BridgeError::InvalidHandle(HandleError::Unknown(_)))
    ));

    // the slot is reused under a new generation
    let again = s.native("GearmanClient_Create", &[]).unwrap();
    assert_ne!(again, client);
    assert_eq!(again & 0xFFFF, client & 0xFFFF);
    s.bridge.unload();
}

//
// 11. Unloading closes everything and stops the worker threads
//
#[test]
fn test_unload() {
    let s = setup();
    let worker = s.worker();
    let echo = s.echo_function("echo", COMPLETE);
    s.add_function(worker, "echo", echo);
    let client = s.client();
    s.add_task(client, "unserved", "x", 0);

    assert!(!s.bridge.registry().is_empty());
    s.bridge.unload();
    assert!(s.bridge.registry().is_empty());
    assert!(s.native("CloseHandle", &[worker]).is_err());
}

//
// 12. A workload that is not UTF-8 reaches the worker byte for byte
//
#[test]
fn test_binary_workload_reaches_worker_unchanged() {
    let s = setup();
    let buffer = s.host.buffer();
    let bridge = s.bridge.clone();
    let host = s.host.clone();
    let inspect = s.host.register("inspect", move |args| match args {
        [HostArg::Handle(job), ..] => {
            let read = [job.as_cell(), buffer, 16];
            match host.call_native(&bridge, "GearmanJob_Workload", &read) {
                Ok(2) => ReturnCode::SUCCESS.as_cell(),
                _ => ReturnCode::FAIL.as_cell(),
            }
        }
        _ => ReturnCode::FAIL.as_cell(),
    });
    let worker = s.worker();
    s.add_function(worker, "inspect", inspect);

    // submitted straight through the library, host strings cannot carry it
    let mut client = s.library.client();
    client.add_server("localhost", 4730);
    client.set_timeout(Some(WAIT));
    client
        .add_task("inspect", "", b"\xff\xfe", Priority::Normal, None)
        .unwrap();
    assert_eq!(client.run_tasks(), ReturnCode::SUCCESS);

    let call = &s.host.calls_to("inspect")[0];
    assert_eq!(
        call.args[1..],
        [LoggedArg::Bytes(vec![0xff, 0xfe]), LoggedArg::Cell(2)]
    );
    assert_eq!(call.result, 0);
    assert_eq!(s.host.buffer_bytes(buffer), Some(vec![0xff, 0xfe]));
    s.bridge.unload();
}
