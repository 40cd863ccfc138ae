//! Single-flight execution of tool runs for one workspace.
//!
//! [`ExecutionSupervisor::execute`] spawns the tool for a project, pipes its
//! stdout through a [`LineSplitter`] into the [`ProcessorChain`], echoes both
//! streams to the [`OutputSink`], and resolves a [`RunHandle`] once the
//! process exits. At most one run is in flight per supervisor; a second
//! request fails fast with [`SupervisorError::AlreadyRunning`].
//!
//! Each run uses three threads: one per output stream and one that owns the
//! child and waits for it. All stdout lines are dispatched before the exit
//! is handled.

use std::{
    collections::HashMap,
    io::{self, Read},
    path::{Path, PathBuf},
    process::{Child, Command, ExitStatus, Stdio},
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    thread::{self, JoinHandle},
    time::Duration,
};

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use lsp_types::MessageType;
use serde::Serialize;

use crate::{
    args,
    backend::{Manifest, ProjectBackend},
    debug::{DebugHandshake, DebuggerHost, NoDebugger},
    error::SupervisorError,
    kill::ProcessKiller,
    logging::clean_ansi,
    options::RunOptions,
    processor::{LineContext, ProcessorChain},
    splitter::LineSplitter,
    target::RunTarget,
};

const READ_BUFFER_SIZE: usize = 8 * 1024;

/// Which child stream a line came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Stream {
    Stdout,
    Stderr,
}

/// Receives every line the tool prints.
pub trait OutputSink: Send + Sync {
    fn line(&self, stream: Stream, line: &str);
}

/// The single user-facing notification channel.
pub trait Notifier: Send + Sync {
    fn show(&self, level: MessageType, message: &str);
}

/// Passed to pre-execute hooks right before the child is spawned.
pub struct PreExecute<'a> {
    /// Variables added on top of the inherited environment.
    pub env: &'a HashMap<String, String>,
    pub status: &'a str,
}

/// Passed to post-execute hooks once the child has exited, or once spawning
/// it failed after the pre-execute hooks ran.
pub struct PostExecute<'a> {
    pub project_root: &'a Path,
    pub aborted: bool,
}

type PreExecuteHook = Arc<dyn Fn(&PreExecute<'_>) + Send + Sync>;
type PostExecuteHook = Arc<dyn Fn(&PostExecute<'_>) + Send + Sync>;

/// One run request.
#[derive(Debug, Clone, Default)]
pub struct RunRequest {
    pub target: RunTarget,
    /// Launch configuration merged with the command's overrides.
    pub options: RunOptions,
    pub debug: bool,
}

/// How a run ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunOutcome {
    pub success: bool,
    pub aborted: bool,
    pub exit_code: Option<i32>,
}

/// Mutable per-workspace state, only touched by the supervisor.
#[derive(Default, Clone)]
pub struct ExecutionState {
    executing: bool,
    aborted: bool,
    pid: Option<u32>,
    debug: Option<Arc<DebugHandshake>>,
}

impl ExecutionState {
    #[must_use]
    pub fn is_executing(&self) -> bool {
        self.executing
    }

    #[must_use]
    pub fn is_aborted(&self) -> bool {
        self.aborted
    }

    #[must_use]
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }
}

/// Handle on an in-flight run. Resolves exactly once.
pub struct RunHandle {
    pid: u32,
    outcome: Receiver<Result<RunOutcome, SupervisorError>>,
}

impl RunHandle {
    #[must_use]
    pub fn pid(&self) -> u32 {
        self.pid
    }

    /// Block until the run resolves.
    pub fn wait(self) -> Result<RunOutcome, SupervisorError> {
        self.outcome.recv().map_err(|_| lost_waiter())?
    }

    /// Block for at most `timeout`; `None` if the run is still going.
    pub fn wait_timeout(&self, timeout: Duration) -> Option<Result<RunOutcome, SupervisorError>> {
        match self.outcome.recv_timeout(timeout) {
            Ok(outcome) => Some(outcome),
            Err(RecvTimeoutError::Timeout) => None,
            Err(RecvTimeoutError::Disconnected) => Some(Err(lost_waiter())),
        }
    }
}

fn lost_waiter() -> SupervisorError {
    SupervisorError::IO(io::Error::other("run waiter exited without resolving"))
}

pub struct SupervisorBuilder {
    sink: Arc<dyn OutputSink>,
    notifier: Arc<dyn Notifier>,
    debugger: Arc<dyn DebuggerHost>,
    debugger_settle: Duration,
    killer: ProcessKiller,
    chain: ProcessorChain,
}

impl SupervisorBuilder {
    #[must_use]
    pub fn debugger(mut self, debugger: Arc<dyn DebuggerHost>) -> Self {
        self.debugger = debugger;
        self
    }

    #[must_use]
    pub fn debugger_settle(mut self, settle: Duration) -> Self {
        self.debugger_settle = settle;
        self
    }

    #[must_use]
    pub fn killer(mut self, killer: ProcessKiller) -> Self {
        self.killer = killer;
        self
    }

    #[must_use]
    pub fn processors(mut self, chain: ProcessorChain) -> Self {
        self.chain = chain;
        self
    }

    #[must_use]
    pub fn build(self) -> ExecutionSupervisor {
        ExecutionSupervisor {
            inner: Arc::new(Inner {
                state: Mutex::default(),
                killer: self.killer,
                chain: self.chain,
                sink: self.sink,
                notifier: self.notifier,
                debugger: self.debugger,
                debugger_settle: self.debugger_settle,
                pre_hooks: Mutex::default(),
                post_hooks: Mutex::default(),
                report_path: Mutex::default(),
            }),
        }
    }
}

struct Inner {
    state: Mutex<ExecutionState>,
    killer: ProcessKiller,
    chain: ProcessorChain,
    sink: Arc<dyn OutputSink>,
    notifier: Arc<dyn Notifier>,
    debugger: Arc<dyn DebuggerHost>,
    debugger_settle: Duration,
    pre_hooks: Mutex<Vec<PreExecuteHook>>,
    post_hooks: Mutex<Vec<PostExecuteHook>>,
    report_path: Mutex<Option<PathBuf>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

pub struct ExecutionSupervisor {
    inner: Arc<Inner>,
}

impl ExecutionSupervisor {
    #[must_use]
    pub fn builder(sink: Arc<dyn OutputSink>, notifier: Arc<dyn Notifier>) -> SupervisorBuilder {
        SupervisorBuilder {
            sink,
            notifier,
            debugger: Arc::new(NoDebugger),
            debugger_settle: Duration::ZERO,
            killer: ProcessKiller::for_platform(),
            chain: ProcessorChain::default(),
        }
    }

    pub fn on_pre_execute<F>(&self, hook: F)
    where
        F: Fn(&PreExecute<'_>) + Send + Sync + 'static,
    {
        lock(&self.inner.pre_hooks).push(Arc::new(hook));
    }

    pub fn on_post_execute<F>(&self, hook: F)
    where
        F: Fn(&PostExecute<'_>) + Send + Sync + 'static,
    {
        lock(&self.inner.post_hooks).push(Arc::new(hook));
    }

    #[must_use]
    pub fn is_executing(&self) -> bool {
        lock(&self.inner.state).executing
    }

    /// Snapshot of the execution state.
    #[must_use]
    pub fn state(&self) -> ExecutionState {
        lock(&self.inner.state).clone()
    }

    /// The last html report path any run of this workspace announced.
    #[must_use]
    pub fn last_report_path(&self) -> Option<PathBuf> {
        lock(&self.inner.report_path).clone()
    }

    /// Start a run of `request` in `backend`'s project.
    ///
    /// Fails immediately, without touching the in-flight run, when another
    /// run is still executing.
    pub fn execute(
        &self,
        backend: &ProjectBackend,
        request: RunRequest,
    ) -> Result<RunHandle, SupervisorError> {
        {
            let mut state = lock(&self.inner.state);
            if state.executing {
                return Err(SupervisorError::AlreadyRunning);
            }
            state.executing = true;
            state.aborted = false;
        }

        let launch = match prepare(&self.inner, backend, request) {
            Ok(launch) => launch,
            Err(error) => return Err(self.inner.failed_to_start(error)),
        };

        self.inner.run_pre_hooks(&PreExecute {
            env: &launch.env,
            status: &launch.status,
        });
        match spawn(&self.inner, backend, launch) {
            Ok(handle) => Ok(handle),
            Err(error) => {
                let error = self.inner.failed_to_start(error);
                self.inner.run_post_hooks(&PostExecute {
                    project_root: backend.root(),
                    aborted: false,
                });
                Err(error)
            }
        }
    }

    /// Request termination of the in-flight run, if any.
    ///
    /// Returns once termination has been requested; the run's handle
    /// resolves later when the process exits. With `aborted` set the run
    /// resolves as an unsuccessful, aborted outcome.
    pub fn cancel(&self, aborted: bool) -> Result<(), SupervisorError> {
        self.inner.cancel(aborted)
    }
}

impl Inner {
    fn cancel(&self, aborted: bool) -> Result<(), SupervisorError> {
        let (pid, debug) = {
            let mut state = lock(&self.state);
            let Some(pid) = state.pid else {
                log::debug!("cancel requested with no run in flight");
                return Ok(());
            };
            if aborted {
                state.aborted = true;
            }
            (pid, state.debug.clone())
        };

        if let Some(debug) = debug {
            debug.detach();
        }
        log::info!("terminating run {pid} (aborted: {aborted})");
        self.killer.terminate(pid)
    }

    /// Back to idle after a run that never got going.
    fn failed_to_start(&self, error: SupervisorError) -> SupervisorError {
        *lock(&self.state) = ExecutionState::default();
        log::error!("failed to start run: {error}");
        self.notifier.show(MessageType::ERROR, &error.to_string());
        error
    }

    /// The child has been reaped; its pid must not be signalled any more.
    fn reaped(&self) {
        lock(&self.state).pid = None;
    }

    fn run_pre_hooks(&self, event: &PreExecute<'_>) {
        let hooks = lock(&self.pre_hooks).clone();
        for hook in hooks {
            hook(event);
        }
    }

    fn run_post_hooks(&self, event: &PostExecute<'_>) {
        let hooks = lock(&self.post_hooks).clone();
        for hook in hooks {
            hook(event);
        }
    }

    /// Dispatch one stdout line through the processor chain and apply what
    /// the processors asked for.
    fn handle_stdout_line(&self, line: &str, debug: &DebugHandshake) {
        self.sink.line(Stream::Stdout, line);
        log::trace!("stdout: {line}");

        let clean = clean_ansi(line);
        let mut context = LineContext::new(debug);
        if self.chain.dispatch(&clean, &mut context) == 0 {
            return;
        }
        let (report_path, failure) = context.into_effects();
        if let Some(path) = report_path {
            *lock(&self.report_path) = Some(path);
        }
        if let Some(error) = failure {
            log::error!("{error}");
            self.notifier.show(MessageType::ERROR, &error.to_string());
            if let Err(kill_error) = self.cancel(true) {
                log::error!("failed to cancel run: {kill_error}");
                self.notifier
                    .show(MessageType::ERROR, &kill_error.to_string());
            }
        }
    }

    /// Exit handling: back to idle, post hooks, then resolve the run.
    fn finish(
        &self,
        project_root: &Path,
        debug: &DebugHandshake,
        status: io::Result<ExitStatus>,
    ) -> Result<RunOutcome, SupervisorError> {
        let aborted = {
            let mut state = lock(&self.state);
            let aborted = state.aborted;
            *state = ExecutionState::default();
            aborted
        };

        let never_ready = debug.is_waiting();
        debug.detach();
        if never_ready && !aborted {
            let error = SupervisorError::DebuggerAttach(
                "the runner exited before it was ready for debugging".to_string(),
            );
            log::error!("{error}");
            self.notifier.show(MessageType::ERROR, &error.to_string());
        }

        self.run_post_hooks(&PostExecute {
            project_root,
            aborted,
        });

        let status = status?;
        let outcome = RunOutcome {
            success: !aborted && !never_ready && status.success(),
            aborted,
            exit_code: status.code(),
        };
        log::info!("run finished: {outcome:?}");
        Ok(outcome)
    }
}

/// Everything a run needs before its process exists.
struct Launch {
    root: PathBuf,
    args: Vec<String>,
    env: HashMap<String, String>,
    status: String,
    debug: Arc<DebugHandshake>,
}

fn prepare(
    inner: &Inner,
    backend: &ProjectBackend,
    request: RunRequest,
) -> Result<Launch, SupervisorError> {
    let root = backend.root().to_path_buf();
    let target = request.target.anchored_at(&root)?;
    let options = request.options.scoped_to(&target);
    let args = args::build(backend, &target, &options);

    let mut env = backend.env_overlay()?;
    let debug = Arc::new(if request.debug {
        let manifest = Manifest::read(&root)?;
        let language = manifest.language().ok_or_else(|| {
            SupervisorError::DebuggerAttach(format!(
                "debugging is not supported for {} projects",
                manifest.language
            ))
        })?;
        DebugHandshake::new(language, Arc::clone(&inner.debugger), inner.debugger_settle)
    } else {
        DebugHandshake::disabled()
    });
    debug.prepare(&mut env)?;

    Ok(Launch {
        root,
        args,
        env,
        status: target.status_label(),
        debug,
    })
}

fn spawn(
    inner: &Arc<Inner>,
    backend: &ProjectBackend,
    launch: Launch,
) -> Result<RunHandle, SupervisorError> {
    let Launch {
        root,
        args,
        env,
        debug,
        ..
    } = launch;
    let program = backend.command();
    log::info!(
        "spawning {} {} in {}",
        program.display(),
        args.join(" "),
        root.display()
    );
    let mut command = Command::new(program);
    command
        .args(&args)
        .current_dir(&root)
        .envs(&env)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    #[cfg(unix)]
    if inner.killer.needs_process_group() {
        use std::os::unix::process::CommandExt;
        command.process_group(0);
    }

    let mut child = command
        .spawn()
        .map_err(|source| SupervisorError::CommandSpawn {
            command: program.display().to_string(),
            source,
        })?;
    let pid = child.id();
    {
        let mut state = lock(&inner.state);
        state.pid = Some(pid);
        state.debug = Some(Arc::clone(&debug));
    }

    match watch(inner, child, root, debug) {
        Ok(outcome) => Ok(RunHandle { pid, outcome }),
        Err((error, child)) => {
            abandon(inner, child);
            Err(error)
        }
    }
}

/// Kill a child nobody is watching and reap it.
fn abandon(inner: &Inner, mut child: Child) -> Option<ExitStatus> {
    let pid = child.id();
    if let Err(error) = inner.killer.terminate(pid) {
        log::error!("failed to terminate run {pid}: {error}");
    }
    if let Err(error) = child.kill() {
        log::debug!("kill of run {pid}: {error}");
    }
    match child.wait() {
        Ok(status) => Some(status),
        Err(error) => {
            log::error!("failed to reap run {pid}: {error}");
            None
        }
    }
}

type Outcome = Receiver<Result<RunOutcome, SupervisorError>>;

fn spawn_readers(
    inner: &Arc<Inner>,
    child: &mut Child,
    debug: &Arc<DebugHandshake>,
) -> Result<Vec<JoinHandle<io::Result<()>>>, SupervisorError> {
    let mut readers = Vec::new();

    if let Some(stdout) = child.stdout.take() {
        let mut splitter = LineSplitter::new();
        let line_inner = Arc::clone(inner);
        let line_debug = Arc::clone(debug);
        splitter.on_line(move |line| line_inner.handle_stdout_line(line, &line_debug));
        readers.push(spawn_named("gauge-stdout", move || pump(stdout, splitter))?);
    }
    if let Some(stderr) = child.stderr.take() {
        let mut splitter = LineSplitter::new();
        let sink = Arc::clone(&inner.sink);
        splitter.on_line(move |line| {
            log::trace!("stderr: {line}");
            sink.line(Stream::Stderr, line);
        });
        readers.push(spawn_named("gauge-stderr", move || pump(stderr, splitter))?);
    }
    Ok(readers)
}

/// Start the reader and waiter threads for a spawned child. On failure the
/// child is handed back so the caller can reap it.
fn watch(
    inner: &Arc<Inner>,
    mut child: Child,
    root: PathBuf,
    debug: Arc<DebugHandshake>,
) -> Result<Outcome, (SupervisorError, Child)> {
    let readers = match spawn_readers(inner, &mut child, &debug) {
        Ok(readers) => readers,
        Err(error) => return Err((error, child)),
    };

    let (child_sender, child_receiver) = crossbeam_channel::bounded::<Child>(1);
    let (sender, receiver): (Sender<_>, Receiver<_>) = crossbeam_channel::bounded(1);
    let waiter_inner = Arc::clone(inner);
    let waiter = spawn_named("gauge-waiter", move || {
        let Ok(mut child) = child_receiver.recv() else {
            return;
        };
        let status = child.wait();
        waiter_inner.reaped();
        for reader in readers {
            match reader.join() {
                Ok(Ok(())) => {}
                Ok(Err(error)) => log::warn!("reading child output failed: {error}"),
                Err(_) => log::error!("child output reader panicked"),
            }
        }
        let outcome = waiter_inner.finish(&root, &debug, status);
        if sender.send(outcome).is_err() {
            log::debug!("run handle dropped before the run resolved");
        }
    });
    if let Err(error) = waiter {
        return Err((error, child));
    }

    match child_sender.send(child) {
        Ok(()) => Ok(receiver),
        Err(unsent) => Err((lost_waiter(), unsent.into_inner())),
    }
}

fn spawn_named<F, T>(name: &str, f: F) -> Result<JoinHandle<T>, SupervisorError>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    Ok(thread::Builder::new().name(name.to_string()).spawn(f)?)
}

/// Copy a child stream into `splitter` until EOF.
fn pump(mut reader: impl Read, mut splitter: LineSplitter) -> io::Result<()> {
    let mut buffer = [0u8; READ_BUFFER_SIZE];
    let result = loop {
        match reader.read(&mut buffer) {
            Ok(0) => break Ok(()),
            Ok(read) => splitter.append_bytes(&buffer[..read]),
            Err(error) if error.kind() == io::ErrorKind::Interrupted => {}
            Err(error) => break Err(error),
        }
    };
    splitter.close();
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Quiet;

    impl OutputSink for Quiet {
        fn line(&self, _: Stream, _: &str) {}
    }

    impl Notifier for Quiet {
        fn show(&self, _: MessageType, _: &str) {}
    }

    fn supervisor() -> ExecutionSupervisor {
        ExecutionSupervisor::builder(Arc::new(Quiet), Arc::new(Quiet)).build()
    }

    #[test]
    fn cancel_without_a_run_is_a_no_op() {
        let supervisor = supervisor();
        supervisor.cancel(true).unwrap();
        assert!(!supervisor.is_executing());
    }

    #[test]
    fn spawn_failure_returns_to_idle() {
        let dir = tempfile::tempdir().unwrap();
        let backend = ProjectBackend::Direct {
            root: dir.path().to_path_buf(),
            command: dir.path().join("missing-gauge"),
        };
        let supervisor = supervisor();
        let result = supervisor.execute(&backend, RunRequest::default());
        assert!(matches!(result, Err(SupervisorError::CommandSpawn { .. })));
        assert!(!supervisor.is_executing());
    }

    #[test]
    fn spawn_failure_still_closes_the_run_for_hooks() {
        use std::sync::atomic::{AtomicUsize, Ordering};

        let dir = tempfile::tempdir().unwrap();
        let backend = ProjectBackend::Direct {
            root: dir.path().to_path_buf(),
            command: dir.path().join("missing-gauge"),
        };
        let supervisor = supervisor();
        let pre = Arc::new(AtomicUsize::new(0));
        let post = Arc::new(AtomicUsize::new(0));
        let pre_seen = Arc::clone(&pre);
        supervisor.on_pre_execute(move |_| {
            pre_seen.fetch_add(1, Ordering::SeqCst);
        });
        let post_seen = Arc::clone(&post);
        let root = dir.path().to_path_buf();
        supervisor.on_post_execute(move |event| {
            assert_eq!(event.project_root, root);
            assert!(!event.aborted);
            post_seen.fetch_add(1, Ordering::SeqCst);
        });

        assert!(supervisor.execute(&backend, RunRequest::default()).is_err());
        assert_eq!(pre.load(Ordering::SeqCst), 1);
        assert_eq!(post.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn failures_before_the_pre_hooks_run_no_hooks() {
        let dir = tempfile::tempdir().unwrap();
        let backend = ProjectBackend::Direct {
            root: dir.path().join("project"),
            command: dir.path().join("missing-gauge"),
        };
        let supervisor = supervisor();
        let calls = Arc::new(Mutex::new(Vec::new()));
        let pre_calls = Arc::clone(&calls);
        supervisor.on_pre_execute(move |_| pre_calls.lock().unwrap().push("pre"));
        let post_calls = Arc::clone(&calls);
        supervisor.on_post_execute(move |_| post_calls.lock().unwrap().push("post"));

        let request = RunRequest {
            target: "../elsewhere/a.spec".parse().unwrap(),
            ..RunRequest::default()
        };
        assert!(supervisor.execute(&backend, request).is_err());
        assert!(calls.lock().unwrap().is_empty());
    }

    #[test]
    fn cancel_after_the_child_is_reaped_changes_nothing() {
        let supervisor = supervisor();
        {
            let mut state = lock(&supervisor.inner.state);
            state.executing = true;
            state.pid = Some(u32::MAX);
        }
        supervisor.inner.reaped();

        supervisor.cancel(true).unwrap();
        let state = supervisor.state();
        assert!(state.is_executing());
        assert!(!state.is_aborted());
        assert_eq!(state.pid(), None);
    }

    #[cfg(unix)]
    #[test]
    fn abandoned_children_are_killed_and_reaped() {
        let supervisor = supervisor();
        let child = Command::new("sleep").arg("30").spawn().unwrap();
        let status = abandon(&supervisor.inner, child).expect("child was not reaped");
        assert!(!status.success());
    }

    #[test]
    fn targets_outside_the_project_are_rejected_before_spawning() {
        let dir = tempfile::tempdir().unwrap();
        let backend = ProjectBackend::Direct {
            root: dir.path().join("project"),
            command: PathBuf::from("gauge"),
        };
        let request = RunRequest {
            target: "../elsewhere/a.spec".parse().unwrap(),
            ..RunRequest::default()
        };
        let result = supervisor().execute(&backend, request);
        assert!(matches!(
            result,
            Err(SupervisorError::TargetOutsideProject(_))
        ));
    }

    #[test]
    fn pump_flushes_the_partial_last_line() {
        let lines = Arc::new(Mutex::new(Vec::new()));
        let mut splitter = LineSplitter::new();
        let sink = Arc::clone(&lines);
        splitter.on_line(move |line| sink.lock().unwrap().push(line.to_string()));
        pump(&b"one\ntwo"[..], splitter).unwrap();
        assert_eq!(*lines.lock().unwrap(), vec!["one", "two"]);
    }
}
