//! Process-level entry point
//!
//! A [`Runtime`] owns the default engine, any engines created later for
//! specific workloads, and the thread-conversion policy consulted by
//! [`Runtime::spawn_thread`].

use crate::config::{ThreadPolicyConfig, WispConfig};
use crate::error::{WispError, WispResult};
use crate::policy::{Conversion, PolicyHandle, ThreadDescriptor};
use crate::scheduler::{blocking, Engine, TaskBuilder, TaskHandle, TaskOutcome, ThreadFactory};
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// The default engine plus the thread-conversion policy.
pub struct Runtime {
    config: WispConfig,
    default: Engine,
    extra: Mutex<Vec<Engine>>,
    policy: PolicyHandle,
}

/// A thread started through [`Runtime::spawn_thread`].
#[derive(Debug)]
pub enum ThreadHandle {
    /// Converted into a task on the default engine
    Task(TaskHandle),
    /// Left as an OS thread
    Native(JoinHandle<()>),
}

impl ThreadHandle {
    /// Whether the thread was converted into a task
    pub fn is_task(&self) -> bool {
        matches!(self, ThreadHandle::Task(_))
    }

    /// Wait for the thread to finish.
    ///
    /// A native thread that panicked reports [`TaskOutcome::Panicked`].
    pub fn join(self) -> TaskOutcome {
        match self {
            ThreadHandle::Task(handle) => handle.join(),
            ThreadHandle::Native(handle) => {
                match blocking(move || handle.join()) {
                    Ok(()) => TaskOutcome::Completed,
                    Err(_) => TaskOutcome::Panicked,
                }
            }
        }
    }
}

impl Runtime {
    /// Compile the thread policy and start the default engine.
    pub fn new(config: WispConfig) -> WispResult<Self> {
        config.validate()?;
        let policy = PolicyHandle::from_config(&config.threads)?;
        let default = Engine::new(config.clone())?;
        info!(
            engine = %config.name,
            convert_all = config.threads.convert_all,
            whitelist = config.threads.whitelist.is_some(),
            "runtime started"
        );
        Ok(Self {
            config,
            default,
            extra: Mutex::new(Vec::new()),
            policy,
        })
    }

    /// Build from `WispConfig::default()` with `WISP_*` environment overrides.
    pub fn from_env() -> WispResult<Self> {
        let mut config = WispConfig::default();
        config.apply_env()?;
        Self::new(config)
    }

    /// The default engine
    pub fn engine(&self) -> &Engine {
        &self.default
    }

    /// The active thread-conversion policy
    pub fn policy(&self) -> &PolicyHandle {
        &self.policy
    }

    /// Run `f` as a task on the default engine.
    pub fn spawn<F>(&self, f: F) -> WispResult<TaskHandle>
    where
        F: FnOnce() + Send + 'static,
    {
        self.default.spawn(f)
    }

    /// Submit `f` to the default engine.
    pub fn dispatch<F>(&self, f: F) -> WispResult<()>
    where
        F: FnOnce() + Send + 'static,
    {
        self.default.dispatch(f)
    }

    /// Alias of [`dispatch`](Self::dispatch).
    pub fn execute<F>(&self, f: F) -> WispResult<()>
    where
        F: FnOnce() + Send + 'static,
    {
        self.default.execute(f)
    }

    /// Start another engine named `name` with `carrier_count` carriers whose
    /// threads come from `factory`. Other settings follow the runtime's
    /// configuration. The runtime shuts it down along with the default one.
    pub fn create_engine(
        &self,
        name: impl Into<String>,
        carrier_count: usize,
        factory: Arc<dyn ThreadFactory>,
    ) -> WispResult<Engine> {
        let config = WispConfig {
            name: name.into(),
            carrier_count,
            ..self.config.clone()
        };
        let engine = Engine::with_factory(config, factory)?;
        self.extra.lock().push(engine.clone());
        Ok(engine)
    }

    /// Start a thread, as a task or natively depending on the policy.
    pub fn spawn_thread<F>(&self, descriptor: &ThreadDescriptor, f: F) -> WispResult<ThreadHandle>
    where
        F: FnOnce() + Send + 'static,
    {
        match self.policy.decide(descriptor) {
            Conversion::Task => {
                let handle = TaskBuilder::new()
                    .name(descriptor.name())
                    .spawn_on(&self.default, f)?;
                debug!(thread = descriptor.name(), task = %handle.id(), "thread converted");
                Ok(ThreadHandle::Task(handle))
            }
            Conversion::Native => {
                let handle = thread::Builder::new()
                    .name(descriptor.name().to_string())
                    .spawn(f)
                    .map_err(|source| WispError::ThreadSpawn {
                        name: descriptor.name().to_string(),
                        source,
                    })?;
                Ok(ThreadHandle::Native(handle))
            }
        }
    }

    /// Replace the thread-conversion rules. Invalid rules are rejected and
    /// the current ones stay active. Threads already started keep running
    /// where they are.
    pub fn reload_policy(&self, config: &ThreadPolicyConfig) -> WispResult<()> {
        self.policy.reload(config)?;
        Ok(())
    }

    /// Shut down every engine this runtime started.
    pub fn shutdown(&self) {
        self.default.shutdown();
        for engine in self.extra.lock().iter() {
            engine.shutdown();
        }
    }

    /// Wait for every engine to terminate, sharing one `timeout`.
    pub fn await_termination(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let remaining = || deadline.saturating_duration_since(Instant::now());
        if !self.default.await_termination(remaining()) {
            return false;
        }
        let engines: Vec<Engine> = self.extra.lock().clone();
        engines
            .iter()
            .all(|engine| engine.await_termination(remaining()))
    }
}

impl Drop for Runtime {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl fmt::Debug for Runtime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Runtime")
            .field("default", &self.default)
            .field("engines", &self.extra.lock().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::in_task;
    use std::sync::atomic::{AtomicBool, Ordering};

    fn config() -> WispConfig {
        WispConfig {
            name: "runtime-test".to_string(),
            carrier_count: 2,
            threads: ThreadPolicyConfig {
                convert_all: true,
                blacklist: "name:native-*".to_string(),
                whitelist: None,
            },
            ..WispConfig::default()
        }
    }

    #[test]
    fn test_spawn_thread_follows_policy() {
        let rt = Runtime::new(config()).unwrap();

        let converted = Arc::new(AtomicBool::new(false));
        let flag = converted.clone();
        let handle = rt
            .spawn_thread(&ThreadDescriptor::new("worker-1"), move || {
                flag.store(in_task(), Ordering::SeqCst);
            })
            .unwrap();
        assert!(handle.is_task());
        assert_eq!(handle.join(), TaskOutcome::Completed);
        assert!(converted.load(Ordering::SeqCst));

        let native = rt
            .spawn_thread(&ThreadDescriptor::new("native-1"), || {
                assert!(!in_task());
            })
            .unwrap();
        assert!(!native.is_task());
        assert_eq!(native.join(), TaskOutcome::Completed);

        rt.shutdown();
        assert!(rt.await_termination(Duration::from_secs(5)));
    }

    #[test]
    fn test_invalid_config_rejected() {
        let mut cfg = config();
        cfg.threads.blacklist = "nonsense".to_string();
        assert!(matches!(Runtime::new(cfg), Err(WispError::Policy(_))));
    }
}
