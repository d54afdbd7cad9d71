use std::io::Write;
use std::time::Duration;
use wisp_engine::policy::{Conversion, ConversionPolicy, ThreadDescriptor};
use wisp_engine::{
    current_task, HandOffPolicy, PolicyError, Runtime, TaskOutcome, ThreadPolicyConfig,
    WispConfig, WispError,
};

fn runtime(threads: ThreadPolicyConfig) -> Runtime {
    Runtime::new(WispConfig {
        name: "policy".to_string(),
        carrier_count: 2,
        threads,
        ..WispConfig::default()
    })
    .unwrap()
}

fn converted(rt: &Runtime, name: &str) -> bool {
    let handle = rt
        .spawn_thread(&ThreadDescriptor::new(name), move || {})
        .unwrap();
    let is_task = handle.is_task();
    assert_eq!(handle.join(), TaskOutcome::Completed);
    is_task
}

// ============================================================================
// Black/white-list precedence
// ============================================================================

#[test]
fn test_blacklisted_name_stays_native() {
    let rt = runtime(ThreadPolicyConfig {
        convert_all: true,
        blacklist: "name:wisp-*".to_string(),
        whitelist: None,
    });
    assert!(!converted(&rt, "wisp-1"));
    assert!(converted(&rt, "other-1"));
    rt.shutdown();
    assert!(rt.await_termination(Duration::from_secs(5)));
}

#[test]
fn test_whitelist_only_mode() {
    let rt = runtime(ThreadPolicyConfig {
        convert_all: false,
        blacklist: String::new(),
        whitelist: Some("name:wisp-*".to_string()),
    });
    assert!(converted(&rt, "wisp-1"));
    assert!(!converted(&rt, "other-1"));
    rt.shutdown();
    assert!(rt.await_termination(Duration::from_secs(5)));
}

#[test]
fn test_converted_thread_runs_as_task() {
    let rt = runtime(ThreadPolicyConfig {
        convert_all: true,
        ..ThreadPolicyConfig::default()
    });
    let handle = rt
        .spawn_thread(&ThreadDescriptor::new("job-7"), || {
            let task = current_task().unwrap();
            assert_eq!(task.name(), "job-7");
        })
        .unwrap();
    assert_eq!(handle.join(), TaskOutcome::Completed);
    rt.shutdown();
    assert!(rt.await_termination(Duration::from_secs(5)));
}

#[test]
fn test_class_and_package_rules() {
    let policy = ConversionPolicy::from_config(&ThreadPolicyConfig {
        convert_all: true,
        blacklist: "class:app.io.*Reader; package:legacy.?".to_string(),
        whitelist: None,
    })
    .unwrap();

    let reader = ThreadDescriptor::new("t").with_class("app.io.FileReader");
    let legacy = ThreadDescriptor::new("t").with_class("legacy.a.Worker");
    let fine = ThreadDescriptor::new("t").with_class("app.io.Writer");
    assert_eq!(policy.decide(&reader), Conversion::Native);
    assert_eq!(policy.decide(&legacy), Conversion::Native);
    assert_eq!(policy.decide(&fine), Conversion::Task);
}

// ============================================================================
// Reload
// ============================================================================

#[test]
fn test_reload_changes_decisions_without_restart() {
    let rt = runtime(ThreadPolicyConfig {
        convert_all: true,
        ..ThreadPolicyConfig::default()
    });
    assert!(converted(&rt, "wisp-1"));

    rt.reload_policy(&ThreadPolicyConfig {
        convert_all: true,
        blacklist: "name:wisp-*".to_string(),
        whitelist: None,
    })
    .unwrap();
    assert!(!converted(&rt, "wisp-1"));

    let err = rt
        .reload_policy(&ThreadPolicyConfig {
            convert_all: true,
            blacklist: "name:".to_string(),
            whitelist: None,
        })
        .unwrap_err();
    assert!(matches!(err, WispError::Policy(PolicyError::EmptyPattern(_))));
    // Previous rules still active
    assert!(!converted(&rt, "wisp-1"));
    assert!(converted(&rt, "other-1"));

    rt.shutdown();
    assert!(rt.await_termination(Duration::from_secs(5)));
}

// ============================================================================
// Configuration sources
// ============================================================================

#[test]
fn test_config_from_file_and_env() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(
        file,
        r#"
name = "from-file"
carrier_count = 3

[handoff]
policy = "force"

[threads]
convert_all = false
whitelist = "name:web-*"
"#
    )
    .unwrap();

    let mut config = WispConfig::from_file(file.path()).unwrap();
    assert_eq!(config.name, "from-file");
    assert_eq!(config.carrier_count, 3);
    assert_eq!(config.handoff.policy, HandOffPolicy::Force);
    assert_eq!(config.threads.whitelist.as_deref(), Some("name:web-*"));

    config
        .apply_env_from([
            ("WISP_CARRIER_COUNT", "2"),
            ("WISP_THREAD_BLACKLIST", "name:web-admin"),
        ])
        .unwrap();
    assert_eq!(config.carrier_count, 2);

    let rt = Runtime::new(config).unwrap();
    assert!(converted(&rt, "web-1"));
    assert!(!converted(&rt, "web-admin"));
    assert!(!converted(&rt, "batch-1"));
    rt.shutdown();
    assert!(rt.await_termination(Duration::from_secs(5)));
}

#[test]
fn test_malformed_rules_fail_at_load() {
    let result = Runtime::new(WispConfig {
        name: "bad".to_string(),
        carrier_count: 1,
        threads: ThreadPolicyConfig {
            convert_all: true,
            blacklist: "thread:wisp-*".to_string(),
            whitelist: None,
        },
        ..WispConfig::default()
    });
    assert!(matches!(
        result,
        Err(WispError::Policy(PolicyError::UnknownKind { .. }))
    ));
}
