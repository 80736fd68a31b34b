use super::*;
use crate::client::{ClientContext, Submission, TaskEvent};
use crate::handles::{HandleRegistry, Teardown};
use crate::host::{FuncId, HostArg, PluginContext};
use crate::testing::{init_logger, GatedConnection, RecordingPlugin};
use gearman_lowlevel::{Priority, ReturnCode};

struct Fixture {
    plugin: Arc<RecordingPlugin>,
    gate: GatedConnection,
    registry: Arc<HandleRegistry>,
    client: Arc<ClientContext>,
}

impl Fixture {
    fn new() -> Self {
        init_logger();
        let plugin = RecordingPlugin::new();
        let gate = GatedConnection::default();
        let plugin_dyn: Arc<dyn PluginContext> = plugin.clone();
        let client =
            ClientContext::new(plugin_dyn, Box::new(gate.clone()), &BridgeConfig::default());
        Self {
            plugin,
            gate,
            registry: Arc::new(HandleRegistry::new()),
            client,
        }
    }

    fn task(&self, function: &str) -> Arc<TaskContext> {
        let plugin: Arc<dyn PluginContext> = self.plugin.clone();
        let task = TaskContext::new(
            plugin,
            self.client.clone(),
            &self.registry,
            Submission {
                function: function.to_string(),
                unique: String::new(),
                workload: b"payload".to_vec(),
                priority: Priority::Normal,
            },
            None,
        );
        let handle = self.registry.create(task.clone(), self.plugin.identity).unwrap();
        task.assign_handle(handle);
        task
    }
}

//
// 1. A backlog queued while a pass runs is flushed by exactly one more pass
//
#[test]
fn test_backlog_is_flushed_in_one_pass() {
    let f = Fixture::new();
    f.gate.close_gate();

    assert_eq!(f.client.submit(f.task("first")).unwrap(), Enqueued::NewPass);
    assert!(f.gate.wait_for_passes(1));

    // the dispatcher is now blocked in run_tasks
    let results: Vec<Enqueued> = (0..5)
        .map(|n| f.client.submit(f.task(&format!("queued-{}", n))).unwrap())
        .collect();
    assert_eq!(results[0], Enqueued::NewPass);
    assert!(results[1..].iter().all(|r| *r == Enqueued::Batched));

    f.gate.open_gate();
    assert!(f.gate.wait_for_passes(2));
    assert_eq!(f.gate.passes(), vec![1, 5]);

    f.client.on_handle_destroy();
    f.client.dispatcher().wait_until_finished();
    assert_eq!(f.gate.passes().len(), 2);
    assert_eq!(f.client.dispatcher().passes(), 2);
}

//
// 2. A task the library refuses gets its fail event, with the status name
//
#[test]
fn test_rejected_task_fails() {
    let f = Fixture::new();
    f.gate.state.0.lock().unwrap().reject_next = Some(ReturnCode::INVALID_FUNCTION_NAME);

    let task = f.task("");
    task.set_callback(TaskEvent::Fail, Some(FuncId(9)));
    let handle = task.handle();
    f.client.submit(task.clone()).unwrap();
    assert!(f.gate.wait_for_passes(1));

    assert_eq!(f.gate.passes(), vec![0]);
    assert_eq!(
        f.plugin.calls(),
        vec![(
            FuncId(9),
            vec![
                HostArg::Handle(handle),
                HostArg::String("INVALID_FUNCTION_NAME".to_string())
            ]
        )]
    );
    assert!(task.is_terminated());
    assert!(f.registry.read::<TaskContext>(handle, None).is_err());

    f.client.on_handle_destroy();
    f.client.dispatcher().wait_until_finished();
}

//
// 3. Closing the client abandons what is still queued
//
#[test]
fn test_stop_abandons_queued_tasks() {
    let f = Fixture::new();
    f.gate.close_gate();

    let first = f.task("first");
    f.client.submit(first.clone()).unwrap();
    assert!(f.gate.wait_for_passes(1));
    let queued = f.task("queued");
    f.client.submit(queued.clone()).unwrap();

    f.client.on_handle_destroy();
    assert!(queued.is_abandoned());
    assert!(!first.is_abandoned());
    assert!(matches!(
        f.client.submit(f.task("late")),
        Err(BridgeError::DispatcherStopped)
    ));

    f.gate.open_gate();
    f.client.dispatcher().wait_until_finished();
    assert!(!f.client.dispatcher().is_running());
    assert_eq!(f.gate.passes(), vec![1]);
}

//
// 4. No thread before the first task
//
#[test]
fn test_thread_starts_lazily() {
    let f = Fixture::new();
    assert!(!f.client.dispatcher().is_running());

    f.client.submit(f.task("first")).unwrap();
    assert!(f.gate.wait_for_passes(1));
    assert!(f.client.dispatcher().is_running());

    f.client.on_handle_destroy();
    f.client.dispatcher().wait_until_finished();
    assert!(!f.client.dispatcher().is_running());
}

//
// 5. Every pass is announced by exactly one NewPass, also under contention
//
#[test]
fn test_one_new_pass_per_pass() {
    let f = Fixture::new();
    let mut submitted = 0;
    let mut new_passes = 0;
    for round in 0..20 {
        let results: Vec<Enqueued> = std::thread::scope(|scope| {
            let senders: Vec<_> = (0..4)
                .map(|sender| {
                    let f = &f;
                    scope.spawn(move || {
                        (0..25)
                            .map(|n| {
                                let name = format!("r{}-s{}-{}", round, sender, n);
                                f.client.submit(f.task(&name)).unwrap()
                            })
                            .collect::<Vec<_>>()
                    })
                })
                .collect();
            senders
                .into_iter()
                .flat_map(|sender| sender.join().unwrap())
                .collect()
        });
        submitted += results.len();
        new_passes += results.iter().filter(|r| **r == Enqueued::NewPass).count();
        assert!(f.gate.wait_for_tasks(submitted));
        assert_eq!(f.gate.passes().len(), new_passes);

        // nothing is pending anymore
        assert_eq!(f.client.submit(f.task("after")).unwrap(), Enqueued::NewPass);
        submitted += 1;
        new_passes += 1;
        assert!(f.gate.wait_for_tasks(submitted));
    }
    assert_eq!(f.gate.passes().len(), new_passes);

    f.client.on_handle_destroy();
    f.client.dispatcher().wait_until_finished();
}
