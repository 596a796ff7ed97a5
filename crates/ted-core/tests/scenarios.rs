//! End-to-end context scenarios against the mock driver.
//!
//! Run with: `cargo test -p ted-core --test scenarios`

use std::sync::Arc;
use std::time::Duration;
use ted_core::{ContextOptions, CoreError, OrderedContext, Value};
use ted_vm::mock::{Call, MockDriver, MockMachineSpec, Op};
use ted_vm::{Platform, VmError};

fn driver_with(platform: Platform) -> MockDriver {
    MockDriver::new().with_machine(
        MockMachineSpec::new("vm1", platform)
            .snapshot("clean")
            .script_output("echo hi", "hi\n"),
    )
}

fn linux() -> MockDriver {
    driver_with(Platform::Linux)
}

fn context(driver: &MockDriver) -> OrderedContext {
    OrderedContext::new(
        Arc::new(driver.clone()),
        "vm1:clean",
        ContextOptions::default(),
    )
    .expect("valid tag")
}

fn bootstrap() -> Vec<Call> {
    vec![
        Call::FindMachine("vm1".into()),
        Call::FindSnapshotStrict("clean".into()),
        Call::Revert("clean".into()),
        Call::Start { gui: false },
    ]
}

/// run + snapshot + cleanup issues exactly one ordered call sequence
#[tokio::test]
async fn test_run_snapshot_cleanup_call_order() {
    let driver = linux();
    let mut ctx = context(&driver);
    ctx.run("echo hi").snapshot("after-echo");

    let value = ctx.cleanup().await.expect("cleanup succeeds");
    assert_eq!(value, Value::Null);

    let mut expected = bootstrap();
    expected.extend([
        Call::Script("echo hi".into()),
        Call::CreateSnapshot("after-echo".into()),
        Call::Stop,
        Call::FindSnapshot("last".into()),
        Call::CreateSnapshot("last".into()),
        Call::FindSnapshotStrict("after-echo".into()),
        Call::RemoveSnapshot("after-echo".into()),
    ]);
    assert_eq!(driver.calls(), expected);
    assert_eq!(driver.snapshots("vm1"), vec!["clean", "last"]);
    assert!(ctx.recorded_snapshots().await.is_empty());
}

#[tokio::test]
async fn test_install_on_win32() {
    let driver = driver_with(Platform::Win32);
    let mut ctx = context(&driver);
    ctx.install();
    ctx.settle().await.expect("install succeeds");

    let mut expected = bootstrap();
    expected.extend([
        Call::SetEnv("KALABOX_DEV".into(), "true".into()),
        Call::Copy("../scripts/build/build_deps_win32.ps1".into()),
        Call::Script("../scripts/build/build_deps_win32.bat".into()),
        Call::Script("git version".into()),
        Call::Script("npm version".into()),
        Call::Script("env | grep KALABOX_DEV".into()),
        Call::Script("../scripts/install/install_win32.bat".into()),
        Call::Script("kbox version".into()),
    ]);
    assert_eq!(driver.calls(), expected);
}

#[tokio::test]
async fn test_install_on_linux_uses_posix_installer() {
    let driver = linux();
    let mut ctx = context(&driver);
    ctx.install();
    ctx.settle().await.expect("install succeeds");

    let scripts: Vec<Call> = driver
        .calls()
        .into_iter()
        .filter(|c| c.op() == Op::Script || c.op() == Op::Copy)
        .collect();
    assert_eq!(
        scripts,
        vec![
            Call::Script("../scripts/build/build_deps_linux.sh".into()),
            Call::Script("git version".into()),
            Call::Script("npm version".into()),
            Call::Script("env | grep KALABOX_DEV".into()),
            Call::Script("../scripts/install/install_posix.sh".into()),
            Call::Script("kbox version".into()),
        ]
    );
    assert_eq!(
        driver.env("vm1").get("KALABOX_DEV").map(String::as_str),
        Some("true")
    );
}

#[tokio::test]
async fn test_install_on_unknown_platform_fails_before_scripts() {
    let driver = driver_with(Platform::Other("plan9".into()));
    let mut ctx = context(&driver);
    ctx.install().run("echo hi");

    let err = ctx.settle().await.unwrap_err();
    assert!(matches!(
        err,
        CoreError::UnsupportedPlatform { ref platform, .. } if platform == "plan9"
    ));
    assert!(!driver.calls().iter().any(|c| c.op() == Op::Script));
    assert!(!driver.calls().iter().any(|c| c.op() == Op::Copy));
}

#[tokio::test]
async fn test_failing_smoke_check_stops_install() {
    let driver = linux();
    driver.fail_script("npm version");
    let mut ctx = context(&driver);
    ctx.install();

    let err = ctx.settle().await.unwrap_err();
    assert!(matches!(err, CoreError::Vm(VmError::Script { .. })));
    assert!(!driver
        .calls()
        .contains(&Call::Script("../scripts/install/install_posix.sh".into())));
}

#[tokio::test]
async fn test_revert_missing_snapshot_short_circuits() {
    let driver = linux();
    let mut ctx = context(&driver);
    ctx.settle().await.expect("bootstrap succeeds");
    driver.clear_calls();

    ctx.revert("missingSnap").start();
    let err = ctx.settle().await.unwrap_err();
    assert!(err.is_not_found());
    assert!(matches!(
        err,
        CoreError::Vm(VmError::NotFound { ref name, .. }) if name == "missingSnap"
    ));
    assert_eq!(
        driver.calls(),
        vec![Call::FindSnapshotStrict("missingSnap".into())]
    );
}

#[tokio::test]
async fn test_cleanup_continues_after_stop_failure() {
    let driver = linux();
    driver.fail_on(Op::Stop);
    let mut ctx = context(&driver);
    ctx.snapshot("after-boot");

    let err = ctx.cleanup().await.unwrap_err();
    assert!(matches!(err, CoreError::Vm(VmError::Driver(_))));

    let calls = driver.calls();
    assert!(calls.contains(&Call::CreateSnapshot("last".into())));
    assert!(calls.contains(&Call::RemoveSnapshot("after-boot".into())));
    assert_eq!(driver.snapshots("vm1"), vec!["clean", "last"]);
}

#[tokio::test]
async fn test_cleanup_runs_after_pipeline_failure() {
    let driver = linux();
    driver.fail_script("make test");
    let mut ctx = context(&driver);
    ctx.snapshot("before-test").run("make test").snapshot("after-test");

    let err = ctx.cleanup().await.unwrap_err();
    assert!(matches!(err, CoreError::Vm(VmError::Script { .. })));

    let calls = driver.calls();
    assert!(!calls.contains(&Call::CreateSnapshot("after-test".into())));
    assert!(calls.contains(&Call::Stop));
    assert!(calls.contains(&Call::RemoveSnapshot("before-test".into())));
}

/// When the pipeline and a later phase both fail, the later failure is reported
#[tokio::test]
async fn test_cleanup_last_failure_wins() {
    let driver = linux();
    driver.fail_script("make test");
    driver.fail_on(Op::RemoveSnapshot);
    let mut ctx = context(&driver);
    ctx.snapshot("before-test").run("make test");

    let err = ctx.cleanup().await.unwrap_err();
    assert!(matches!(err, CoreError::Vm(VmError::Driver(_))));
    assert!(driver.calls().contains(&Call::CreateSnapshot("last".into())));
}

/// A failed removal leaves every snapshot still on the machine in the ledger
#[tokio::test]
async fn test_failed_removal_keeps_remaining_ids() {
    let driver = linux();
    driver.fail_on(Op::RemoveSnapshot);
    let mut ctx = context(&driver);
    ctx.snapshot("one").snapshot("two");

    assert!(ctx.cleanup().await.is_err());
    assert_eq!(ctx.recorded_snapshots().await, vec!["one", "two"]);
    assert!(!driver.calls().contains(&Call::RemoveSnapshot("two".into())));

    // Once removal works again a second cleanup finishes the job
    driver.fail_after(Op::RemoveSnapshot, usize::MAX);
    ctx.cleanup().await.expect("second cleanup");
    assert!(ctx.recorded_snapshots().await.is_empty());
    assert_eq!(driver.snapshots("vm1"), vec!["clean", "last"]);
}

/// A removal phase cut short by the step timeout keeps the unremoved ids
#[tokio::test(start_paused = true)]
async fn test_timed_out_removal_keeps_remaining_ids() {
    let driver = linux().with_delay(Duration::from_secs(1));
    let mut ctx = OrderedContext::new(
        Arc::new(driver.clone()),
        "vm1:clean",
        ContextOptions::builder()
            .step_timeout(Duration::from_millis(5500))
            .build(),
    )
    .expect("valid tag");
    ctx.snapshot("a").snapshot("b").snapshot("c");

    let err = ctx.cleanup().await.unwrap_err();
    assert!(matches!(err, CoreError::Timeout(d) if d == Duration::from_millis(5500)));
    assert_eq!(driver.snapshots("vm1"), vec!["clean", "c", "last"]);
    assert_eq!(ctx.recorded_snapshots().await, vec!["c"]);
}

#[tokio::test]
async fn test_reused_context_does_not_remove_twice() {
    let driver = linux();
    let mut ctx = context(&driver);
    ctx.snapshot("a");
    ctx.cleanup().await.expect("first cleanup");

    driver.clear_calls();
    ctx.cleanup().await.expect("second cleanup");
    assert_eq!(
        driver.calls(),
        vec![
            Call::Stop,
            Call::FindSnapshot("last".into()),
            Call::RemoveSnapshot("last".into()),
            Call::CreateSnapshot("last".into()),
        ]
    );
    assert_eq!(driver.snapshots("vm1"), vec!["clean", "last"]);
}

#[tokio::test]
async fn test_cleanup_skipped_when_machine_missing() {
    let driver = MockDriver::new();
    let mut ctx = context(&driver);
    ctx.run("echo hi");

    let err = ctx.cleanup().await.unwrap_err();
    assert!(err.is_not_found());
    assert_eq!(driver.calls(), vec![Call::FindMachine("vm1".into())]);
}

/// No two driver calls overlap even when every call takes time
#[tokio::test(start_paused = true)]
async fn test_steps_never_overlap() {
    let driver = linux().with_delay(Duration::from_millis(50));
    let mut ctx = context(&driver);
    ctx.run("echo hi")
        .snapshot("s1")
        .set_env("A", "1")
        .get_env(|env| env.len())
        .restart()
        .snapshot("s2");
    ctx.cleanup().await.expect("cleanup succeeds");

    assert_eq!(driver.max_in_flight(), 1);
    assert_eq!(driver.calls().first(), Some(&Call::FindMachine("vm1".into())));
    assert_eq!(
        driver.calls().last(),
        Some(&Call::RemoveSnapshot("s2".into()))
    );
}

#[tokio::test]
async fn test_install_helper_with_cleanup() {
    let driver = linux();
    let mut ctx = ted_core::install(Arc::new(driver.clone()), "vm1:clean").expect("valid tag");
    ctx.run("kbox create drupal");
    ctx.cleanup().await.expect("cleanup succeeds");

    let calls = driver.calls();
    let version = calls
        .iter()
        .position(|c| c == &Call::Script("kbox version".into()));
    let create = calls
        .iter()
        .position(|c| c == &Call::Script("kbox create drupal".into()));
    assert!(version < create);
    assert_eq!(calls.last(), Some(&Call::CreateSnapshot("last".into())));
}
