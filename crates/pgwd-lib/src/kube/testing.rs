//! In-memory kubectl and port probe used by the kube tests.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use super::errors::{KubeError, Result};
use super::kubectl::{ForwardProcess, Kubectl};
use super::tunnel::PortProbe;

enum Reply {
    Output(String),
    Failure,
}

/// Answers kubectl queries from a table of `pattern -> reply`.
///
/// The first rule whose pattern is contained in the space-joined arguments
/// wins. Unmatched queries fail like a non-zero kubectl exit.
pub struct FakeKubectl {
    available: bool,
    rules: Vec<(String, Reply)>,
    calls: Mutex<Vec<String>>,
    spawned: Mutex<Vec<String>>,
    forward_exits_after: Option<usize>,
    pub terminations: Arc<AtomicUsize>,
}

impl FakeKubectl {
    pub fn new() -> Self {
        Self {
            available: true,
            rules: Vec::new(),
            calls: Mutex::new(Vec::new()),
            spawned: Mutex::new(Vec::new()),
            forward_exits_after: None,
            terminations: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn unavailable() -> Self {
        Self {
            available: false,
            ..Self::new()
        }
    }

    /// Spawned forwards report themselves as already exited.
    pub fn exiting_forward(self) -> Self {
        self.forward_exits_after(0)
    }

    /// Spawned forwards look alive for `checks` liveness checks, then exited.
    pub fn forward_exits_after(mut self, checks: usize) -> Self {
        self.forward_exits_after = Some(checks);
        self
    }

    pub fn respond(mut self, pattern: &str, output: &str) -> Self {
        self.rules
            .push((pattern.to_string(), Reply::Output(output.to_string())));
        self
    }

    pub fn fail(mut self, pattern: &str) -> Self {
        self.rules.push((pattern.to_string(), Reply::Failure));
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn spawned(&self) -> Vec<String> {
        self.spawned.lock().unwrap().clone()
    }

    pub fn terminated(&self) -> usize {
        self.terminations.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Kubectl for FakeKubectl {
    fn check_available(&self) -> Result<()> {
        if self.available {
            Ok(())
        } else {
            Err(KubeError::KubectlNotFound)
        }
    }

    async fn run(&self, args: &[String]) -> Result<String> {
        let joined = args.join(" ");
        self.calls.lock().unwrap().push(joined.clone());

        for (pattern, reply) in &self.rules {
            if joined.contains(pattern.as_str()) {
                return match reply {
                    Reply::Output(out) => Ok(out.clone()),
                    Reply::Failure => Err(KubeError::command_failed(args, b"fake failure")),
                };
            }
        }
        Err(KubeError::command_failed(args, b"no fake rule"))
    }

    fn spawn(&self, args: &[String]) -> Result<Box<dyn ForwardProcess>> {
        self.spawned.lock().unwrap().push(args.join(" "));
        Ok(Box::new(FakeProcess {
            exits_after: self.forward_exits_after,
            checks: 0,
            terminations: self.terminations.clone(),
        }))
    }
}

struct FakeProcess {
    exits_after: Option<usize>,
    checks: usize,
    terminations: Arc<AtomicUsize>,
}

#[async_trait]
impl ForwardProcess for FakeProcess {
    fn try_wait(&mut self) -> Result<Option<String>> {
        let exited = self.exits_after.is_some_and(|after| self.checks >= after);
        self.checks += 1;
        Ok(exited.then(|| "exit status: 1".to_string()))
    }

    async fn terminate(&mut self) -> Result<()> {
        self.terminations.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Probe that starts succeeding after a fixed number of failed attempts.
pub struct ScriptedProbe {
    fail_first: usize,
    pub attempts: AtomicUsize,
}

impl ScriptedProbe {
    pub fn ready_after(fail_first: usize) -> Self {
        Self {
            fail_first,
            attempts: AtomicUsize::new(0),
        }
    }

    pub fn never_ready() -> Self {
        Self::ready_after(usize::MAX)
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PortProbe for ScriptedProbe {
    async fn probe(&self, _port: u16) -> bool {
        let previous = self.attempts.fetch_add(1, Ordering::SeqCst);
        previous >= self.fail_first
    }
}
