use std::{collections::HashSet, time::Duration};

use assert_matches::assert_matches;
use axon_memory::{IoSource, Memory};
use axon_types::{ActionExpr, Command, ExternalAction, Rule, Value};
use executer::{Evaluator, ExecError, Executer, ExecuterConfig, FatalError};
use testing_tools::{
    mocks::SimpleEvaluator,
    network::{LocalNet, ManualAgent},
    rules
};

fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

async fn wait_for(mut predicate: impl FnMut() -> bool, timeout: Duration) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if predicate() {
            return true
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    predicate()
}

fn share_lorem() -> Rule {
    rules::on(
        "share_lorem",
        &["lorem"],
        rules::for_all("this.lorem > ext.lorem", &[("lorem", "this.lorem")])
    )
}

fn manual_node(
    memory: Memory,
    rules: Vec<Rule>
) -> (Executer<SimpleEvaluator, ManualAgent>, testing_tools::network::ManualHandle) {
    let (agent, handle) = ManualAgent::new();
    let node = Executer::new(memory, rules, agent, SimpleEvaluator, ExecuterConfig::default())
        .expect("init");
    (node, handle)
}

// S1: one input on one node propagates the larger value to its peer.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
#[serial_test::serial]
async fn two_nodes_converge_on_the_larger_value() {
    init_tracing();
    let mut net = LocalNet::new();
    let a = net
        .add_node(Memory::new([("lorem", Value::Integer(5))]).unwrap(), vec![share_lorem()])
        .unwrap();
    let b = net
        .add_node(Memory::new([("lorem", Value::Integer(5))]).unwrap(), vec![share_lorem()])
        .unwrap();
    net.start_all().unwrap();

    b.input("lorem = 10").unwrap();
    assert!(net.settle(500).await, "fleet did not settle");

    for node in [&a, &b] {
        let (snapshot, pool_len) = node.take_state();
        assert_eq!(snapshot.get("lorem"), Some(&Value::Integer(10)));
        assert_eq!(pool_len, 0);
        assert!(node.do_if_stable(|| {}));
        assert!(node.fatal_error().is_none());
    }
    net.stop_all().await.unwrap();
}

// S2: three nodes agree on the maximum and everyone ends up involved.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
#[serial_test::serial]
async fn three_nodes_adopt_the_maximum() {
    init_tracing();
    let rule_set = || {
        vec![
            rules::on_default(
                "notice_change",
                &["ipsum"],
                &[("involved", "true")],
                rules::for_all("ipsum != ext.ipsum", &[("involved", "true")])
            ),
            rules::on(
                "adopt_max",
                &["involved"],
                rules::for_all("involved && ipsum > ext.ipsum", &[("ipsum", "this.ipsum")])
            ),
        ]
    };
    let memory = |ipsum: f64| {
        Memory::new([("ipsum", Value::Float(ipsum)), ("involved", Value::Bool(false))]).unwrap()
    };

    let mut net = LocalNet::new();
    net.add_node(memory(3.0), rule_set()).unwrap();
    net.add_node(memory(6.5), rule_set()).unwrap();
    let third = net.add_node(memory(3.0), rule_set()).unwrap();
    net.start_all().unwrap();

    third.input("ipsum = 6.0").unwrap();
    assert!(net.settle(800).await, "fleet did not settle");

    for node in &net.nodes {
        let (snapshot, pool_len) = node.take_state();
        assert_eq!(snapshot.get("ipsum"), Some(&Value::Float(6.5)));
        assert_eq!(snapshot.get("involved"), Some(&Value::Bool(true)));
        assert_eq!(pool_len, 0);
    }
    net.stop_all().await.unwrap();
}

// S3: a payload whose condition is false answers not_interested and leaves
// memory and pool untouched.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
#[serial_test::serial]
async fn false_condition_answers_not_interested() {
    init_tracing();
    let (node, handle) = manual_node(Memory::new([("lorem", Value::Integer(5))]).unwrap(), vec![]);
    node.start().unwrap();

    let payload = SimpleEvaluator
        .marshal(&[ExternalAction {
            condition:        "ext.lorem > 100".to_owned(),
            cond_working_set: HashSet::from(["lorem".to_owned()]),
            actions:          vec![ActionExpr::new("lorem", "0")],
            working_sets:     vec![HashSet::new()]
        }])
        .unwrap();

    let mut port = handle.submit(payload).await.expect("running");
    assert_eq!(port.recv().await, Some(Command::NotInterested));

    let (snapshot, pool_len) = node.take_state();
    assert_eq!(snapshot.get("lorem"), Some(&Value::Integer(5)));
    assert_eq!(pool_len, 0);
    node.stop().await.unwrap();
}

// An undecodable payload is aborted without touching anything.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
#[serial_test::serial]
async fn garbage_payload_is_aborted() {
    init_tracing();
    let (node, handle) = manual_node(Memory::new([("lorem", Value::Integer(5))]).unwrap(), vec![]);
    node.start().unwrap();

    let mut port = handle.submit(b"not json".to_vec()).await.expect("running");
    assert_eq!(port.recv().await, Some(Command::Aborted));
    assert_eq!(node.take_state().1, 0);
    node.stop().await.unwrap();
}

// S4: of two transactions with overlapping read/write sets the one that
// commits second is aborted at can_commit?.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
#[serial_test::serial]
async fn overlapping_transactions_conflict() {
    init_tracing();
    let (node, handle) = manual_node(Memory::new([("lorem", Value::Integer(5))]).unwrap(), vec![]);
    node.start().unwrap();

    let payload = || {
        SimpleEvaluator
            .marshal(&[ExternalAction {
                condition:        "ext.lorem >= 0".to_owned(),
                cond_working_set: HashSet::from(["lorem".to_owned()]),
                actions:          vec![ActionExpr::new("lorem", "ext.lorem + 1")],
                working_sets:     vec![HashSet::from(["lorem".to_owned()])]
            }])
            .unwrap()
    };

    let mut first = handle.submit(payload()).await.expect("running");
    assert_eq!(first.recv().await, Some(Command::Interested));
    let mut second = handle.submit(payload()).await.expect("running");
    assert_eq!(second.recv().await, Some(Command::Interested));

    // first commits
    first.send(Command::CanCommit).await.unwrap();
    assert_eq!(first.recv().await, Some(Command::Prepared));
    first.send(Command::DoCommit).await.unwrap();
    assert_eq!(first.recv().await, Some(Command::Done));

    // wait until the commit reached the pool, then the second must abort
    assert!(wait_for(|| node.take_state().1 == 1, Duration::from_secs(1)).await);
    second.send(Command::CanCommit).await.unwrap();
    assert_eq!(second.recv().await, Some(Command::Aborted));

    node.exec().unwrap();
    let (snapshot, pool_len) = node.take_state();
    assert_eq!(snapshot.get("lorem"), Some(&Value::Integer(6)));
    assert_eq!(pool_len, 0);
    node.stop().await.unwrap();
}

// FIFO commit: both transactions prepare, the later one decides first, yet
// pool order follows enqueue order.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
#[serial_test::serial]
async fn prepared_transactions_commit_in_enqueue_order() {
    init_tracing();
    let (node, handle) = manual_node(
        Memory::new([("a", Value::Integer(0)), ("b", Value::Integer(0))]).unwrap(),
        vec![]
    );
    node.start().unwrap();

    let payload = |resource: &str, value: i64| {
        SimpleEvaluator
            .marshal(&[ExternalAction {
                condition:        "true".to_owned(),
                cond_working_set: HashSet::new(),
                actions:          vec![ActionExpr::new(resource, value.to_string())],
                working_sets:     vec![HashSet::new()]
            }])
            .unwrap()
    };

    let mut first = handle.submit(payload("a", 1)).await.expect("running");
    assert_eq!(first.recv().await, Some(Command::Interested));
    first.send(Command::CanCommit).await.unwrap();
    assert_eq!(first.recv().await, Some(Command::Prepared));

    let mut second = handle.submit(payload("b", 2)).await.expect("running");
    assert_eq!(second.recv().await, Some(Command::Interested));
    second.send(Command::CanCommit).await.unwrap();
    assert_eq!(second.recv().await, Some(Command::Prepared));

    // decide in reverse order
    second.send(Command::DoCommit).await.unwrap();
    first.send(Command::DoCommit).await.unwrap();
    assert_eq!(first.recv().await, Some(Command::Done));
    assert_eq!(second.recv().await, Some(Command::Done));

    assert!(wait_for(|| node.take_state().1 == 2, Duration::from_secs(1)).await);
    node.exec().unwrap();
    assert_eq!(node.take_state().0.get("a"), Some(&Value::Integer(1)));
    assert_eq!(node.take_state().0.get("b"), Some(&Value::Integer(0)));
    node.exec().unwrap();
    assert_eq!(node.take_state().0.get("b"), Some(&Value::Integer(2)));
    node.stop().await.unwrap();
}

// A prepared transaction that is told to abort leaves no trace.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
#[serial_test::serial]
async fn do_abort_after_prepared_is_isolated() {
    init_tracing();
    let (node, handle) = manual_node(Memory::new([("a", Value::Integer(0))]).unwrap(), vec![]);
    node.start().unwrap();

    let payload = SimpleEvaluator
        .marshal(&[ExternalAction {
            condition:        "true".to_owned(),
            cond_working_set: HashSet::new(),
            actions:          vec![ActionExpr::new("a", "7")],
            working_sets:     vec![HashSet::new()]
        }])
        .unwrap();

    let mut port = handle.submit(payload).await.expect("running");
    assert_eq!(port.recv().await, Some(Command::Interested));
    port.send(Command::CanCommit).await.unwrap();
    assert_eq!(port.recv().await, Some(Command::Prepared));
    port.send(Command::DoAbort).await.unwrap();
    assert_eq!(port.recv().await, Some(Command::Done));

    tokio::time::sleep(Duration::from_millis(20)).await;
    let (snapshot, pool_len) = node.take_state();
    assert_eq!(snapshot.get("a"), Some(&Value::Integer(0)));
    assert_eq!(pool_len, 0);
    assert!(node.do_if_stable(|| {}));
    node.stop().await.unwrap();
}

// S5: stop after start yields a functional executer again.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
#[serial_test::serial]
async fn restart_keeps_the_fleet_functional() {
    init_tracing();
    let mut net = LocalNet::new();
    let a = net
        .add_node(Memory::new([("lorem", Value::Integer(5))]).unwrap(), vec![share_lorem()])
        .unwrap();
    let b = net
        .add_node(Memory::new([("lorem", Value::Integer(5))]).unwrap(), vec![share_lorem()])
        .unwrap();
    net.start_all().unwrap();

    assert_matches!(a.start(), Err(ExecError::AlreadyRunning));

    b.input("lorem = 10").unwrap();
    assert!(net.settle(500).await);
    net.stop_all().await.unwrap();

    assert_matches!(a.stop().await, Err(ExecError::NotRunning));
    assert_matches!(a.exec(), Err(ExecError::NotRunning));
    assert_matches!(a.input("lorem = 11"), Err(ExecError::NotRunning));

    // second round after a full restart
    net.start_all().unwrap();
    a.input("lorem = 20").unwrap();
    assert!(net.settle(500).await);
    for node in [&a, &b] {
        assert_eq!(node.take_state().0.get("lorem"), Some(&Value::Integer(20)));
    }
    net.stop_all().await.unwrap();
}

// S6: a same-resource collision flushes the batch, the timer flushes the
// rest; two pool updates in arrival order.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
#[serial_test::serial]
async fn inputs_are_debounced_into_batches() {
    init_tracing();
    let mut memory =
        Memory::new([("a", Value::Integer(0)), ("b", Value::Integer(0))]).unwrap();
    let (feeder, source) = IoSource::channel();
    memory.attach(source);
    for _ in 0..3 {
        // extra idle sources so the size bound is not what flushes
        let (_extra, source) = IoSource::channel();
        memory.attach(source);
    }

    let (node, _handle) = manual_node(memory, vec![]);
    node.start().unwrap();

    assert!(feeder.input("a = 1"));
    assert!(feeder.input("b = 2"));
    assert!(feeder.input("a = 3"));

    assert!(wait_for(|| node.take_state().1 == 2, Duration::from_secs(1)).await);

    node.exec().unwrap();
    let snapshot = node.take_state().0;
    assert_eq!(snapshot.get("a"), Some(&Value::Integer(1)));
    assert_eq!(snapshot.get("b"), Some(&Value::Integer(2)));

    node.exec().unwrap();
    let snapshot = node.take_state().0;
    assert_eq!(snapshot.get("a"), Some(&Value::Integer(3)));
    assert_eq!(snapshot.get("b"), Some(&Value::Integer(2)));
    node.stop().await.unwrap();
}

// Stability fixpoint: with no new input and no traffic, a finite number of
// exec calls reaches a stable pool.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
#[serial_test::serial]
async fn exec_reaches_a_fixpoint() {
    init_tracing();
    let (node, _handle) = manual_node(
        Memory::new([("a", Value::Integer(0)), ("b", Value::Integer(0))]).unwrap(),
        vec![rules::on("chain", &["a"], rules::local("a > 0", &[("b", "a + 1")]))]
    );
    node.start().unwrap();
    assert!(node.do_if_stable(|| {}));

    node.input("a = 1").unwrap();
    assert!(!node.do_if_stable(|| {}));

    let mut execs = 0;
    while !node.do_if_stable(|| {}) {
        node.exec().unwrap();
        execs += 1;
        assert!(execs < 10, "no fixpoint after {execs} execs");
    }
    assert_eq!(node.take_state().0.get("b"), Some(&Value::Integer(2)));
    node.stop().await.unwrap();
}

// A rule-set bug surfaces as a typed fatal error, not a process abort.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
#[serial_test::serial]
async fn local_evaluation_bug_is_a_typed_fatal() {
    init_tracing();
    let (node, _handle) = manual_node(
        Memory::new([("a", Value::Integer(0))]).unwrap(),
        vec![rules::on("broken", &["a"], rules::local("a >", &[("a", "1")]))]
    );
    node.start().unwrap();
    node.input("a = 1").unwrap();

    assert_matches!(node.exec(), Err(ExecError::Fatal(FatalError::LocalEval { .. })));
    assert_matches!(node.fatal_error(), Some(FatalError::LocalEval { .. }));
    node.stop().await.unwrap();
}

// Malformed caller input is returned, not recorded as fatal.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
#[serial_test::serial]
async fn bad_input_is_a_parse_error() {
    init_tracing();
    let (node, _handle) = manual_node(Memory::new([("a", Value::Integer(0))]).unwrap(), vec![]);
    node.start().unwrap();

    assert_matches!(node.input("nope = 1"), Err(ExecError::Parse(_)));
    assert_matches!(node.input("a = true"), Err(ExecError::Parse(_)));
    assert!(node.fatal_error().is_none());
    assert_eq!(node.take_state().1, 0);
    node.stop().await.unwrap();
}

// Unknown rule resources are rejected at construction.
#[tokio::test]
#[serial_test::serial]
async fn rules_are_validated_at_init() {
    let memory = Memory::new([("a", Value::Integer(0))]).unwrap();
    let (agent, _handle) = ManualAgent::new();
    let bad = vec![rules::on("ghost", &["missing"], rules::local("true", &[]))];
    assert!(Executer::new(memory, bad, agent, SimpleEvaluator, ExecuterConfig::default()).is_err());
}
