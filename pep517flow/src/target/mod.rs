//! The host-facing build target.
//!
//! A [`BuildTarget`] owns one pipeline for one `pyproject.toml`. It
//! registers the pipeline's stages with the host's stage graph, turns host
//! invalidation into cancellation plus a replan before the next build, and
//! reports every stage's diagnostics through the configured sink.

mod host;
mod services;

pub use host::{DetachedHostRegistry, HostStageId, HostStageRegistry};
pub use services::TargetServices;

use crate::backend::{discover_project_file, BuildBackend, PyProject};
use crate::cancellation::CancellationToken;
use crate::classify::{OutputClassifier, Pep517Classifier};
use crate::config::TargetConfig;
use crate::core::{BuildArtifact, StageResult, StageStatus};
use crate::errors::{BackendError, Pep517Error};
use crate::fingerprint::{store_key, StalenessInputs};
use crate::observability::stage_span;
use crate::pipeline::{Pipeline, PipelineBuilder, PipelineOutcome, StageSpec};
use crate::process::{CommandSpec, CommandTemplate, TemplateVars};
use crate::stages::{BackendStage, CleanStage, Stage, StageContext};
use parking_lot::RwLock;
use services::ResolvedServices;
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn, Instrument};
use uuid::Uuid;

/// Creates the virtual environment.
pub const PREPARE_STAGE: &str = "prepare";
/// Runs the build backend.
pub const BUILD_STAGE: &str = "build";
/// Installs the built distribution into the virtual environment.
pub const INSTALL_STAGE: &str = "install";
/// Empties the build directory.
pub const CLEAN_STAGE: &str = "clean";

const PIPELINE_NAME: &str = "python-517";

#[cfg(windows)]
const VENV_BIN: &str = "Scripts";
#[cfg(not(windows))]
const VENV_BIN: &str = "bin";

/// The configured pipeline plus the project it was planned from.
struct TargetState {
    project: PyProject,
    backend: Arc<dyn BuildBackend>,
    pipeline: Arc<Pipeline>,
    host_stages: Vec<HostStageId>,
}

/// A python project built through its PEP 517 backend.
///
/// Builds are serialised: a second [`build`](Self::build) waits for the
/// first to finish. Hosts that want the newer build to win call
/// [`invalidate`](Self::invalidate) first, which trips the running
/// pipeline's token and forces a replan.
pub struct BuildTarget {
    config: TargetConfig,
    project_file: PathBuf,
    services: ResolvedServices,
    state: RwLock<TargetState>,
    run_lock: tokio::sync::Mutex<()>,
    invalidated: AtomicBool,
    closed: AtomicBool,
}

impl fmt::Debug for BuildTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.read();
        f.debug_struct("BuildTarget")
            .field("project_file", &self.project_file)
            .field("backend", &state.backend.id())
            .field("pipeline", &state.pipeline)
            .field("closed", &self.closed.load(Ordering::SeqCst))
            .finish_non_exhaustive()
    }
}

impl BuildTarget {
    /// Identifier the host knows this build system by.
    pub const ID: &'static str = "python_517_build_system";
    /// Name shown to users.
    pub const DISPLAY_NAME: &'static str = "Python (pyproject.toml)";
    /// Precedence among build systems claiming the same project.
    pub const PRIORITY: i32 = 500;

    /// Loads the project, plans its pipeline and registers the stages with
    /// the host.
    pub fn initialize(config: TargetConfig, services: TargetServices) -> Result<Self, Pep517Error> {
        let project_file = discover_project_file(&config.project_file)?;
        let services = services.resolve(&config.pipeline)?;
        let mut state = configure(&config, &project_file, &services)?;
        state.host_stages = register(&services, &state.pipeline);

        info!(
            project = %project_file.display(),
            backend = %state.project.build_backend,
            frontend = state.backend.display_name(),
            build_type = %config.build_type,
            "Build target initialised"
        );
        Ok(Self {
            config,
            project_file,
            services,
            state: RwLock::new(state),
            run_lock: tokio::sync::Mutex::new(()),
            invalidated: AtomicBool::new(false),
            closed: AtomicBool::new(false),
        })
    }

    /// Identifier the host knows this build system by.
    #[must_use]
    pub fn id(&self) -> &'static str {
        Self::ID
    }

    /// Name shown to users.
    #[must_use]
    pub fn display_name(&self) -> &'static str {
        Self::DISPLAY_NAME
    }

    /// Precedence among build systems claiming the same project.
    #[must_use]
    pub fn priority(&self) -> i32 {
        Self::PRIORITY
    }

    /// Returns true for the languages this target builds.
    #[must_use]
    pub fn supports_language(&self, language: &str) -> bool {
        language == "python3"
    }

    /// The configuration this target was created with.
    #[must_use]
    pub fn config(&self) -> &TargetConfig {
        &self.config
    }

    /// The `pyproject.toml` this target builds.
    #[must_use]
    pub fn project_file(&self) -> &Path {
        &self.project_file
    }

    /// The project as of the last (re)plan.
    #[must_use]
    pub fn project(&self) -> PyProject {
        self.state.read().project.clone()
    }

    /// The current pipeline.
    #[must_use]
    pub fn pipeline(&self) -> Arc<Pipeline> {
        Arc::clone(&self.state.read().pipeline)
    }

    /// Status of `stage` in the latest run.
    #[must_use]
    pub fn stage_status(&self, stage: &str) -> Option<StageStatus> {
        self.state.read().pipeline.status(stage)
    }

    /// The directory the backend writes distributions to.
    #[must_use]
    pub fn builddir(&self) -> PathBuf {
        let state = self.state.read();
        state.backend.builddir(state.project.root())
    }

    /// Runs the pipeline.
    ///
    /// The project file is re-read first; if it is gone the build is
    /// refused with [`PlanError::ConfigUnreadable`](crate::errors::PlanError)
    /// before any stage starts. A changed project or an earlier
    /// [`invalidate`](Self::invalidate) replans the pipeline.
    pub async fn build(&self) -> Result<PipelineOutcome, Pep517Error> {
        self.ensure_open()?;
        let _running = self.run_lock.lock().await;
        self.ensure_open()?;

        let token = Arc::new(CancellationToken::new());
        let pipeline = self.prepare_run(&token)?;
        let outcome = pipeline.run_all(token).await;
        info!(status = %outcome.status, rebuilt = ?outcome.rebuilt(), "Build finished");
        Ok(outcome)
    }

    /// Cancels the running build and replans before the next one. Returns
    /// true if a build was running.
    pub fn invalidate(&self, reason: impl Into<String>) -> bool {
        let reason = reason.into();
        debug!(%reason, "Build target invalidated");
        self.invalidated.store(true, Ordering::SeqCst);
        self.cancel(reason)
    }

    /// Cancels the running build. Returns true if a build was running.
    pub fn cancel(&self, reason: impl Into<String>) -> bool {
        self.state.read().pipeline.cancel(reason)
    }

    /// Empties the build directory and forgets every recorded fingerprint,
    /// so the next build runs every stage.
    pub async fn clean(&self) -> Result<StageResult, Pep517Error> {
        self.ensure_open()?;
        let _running = self.run_lock.lock().await;

        let (stage, prefix) = {
            let state = self.state.read();
            (self.clean_stage(&state)?, store_key(&state.project.path, ""))
        };
        let ctx = StageContext::new(Uuid::now_v7(), Arc::new(CancellationToken::new()));
        let result = stage.run(&ctx).instrument(stage_span(CLEAN_STAGE, ctx.run_id)).await;
        self.services.sink.stage_completed(&result);

        let forgotten = self.services.store.forget_prefix(&prefix)?;
        info!(status = %result.status, forgotten, "Clean finished");
        Ok(result)
    }

    /// Lists the files in the build directory, sorted by path.
    pub fn artifacts(&self) -> Result<Vec<BuildArtifact>, Pep517Error> {
        let entries = match std::fs::read_dir(self.builddir()) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut artifacts = Vec::new();
        for entry in entries {
            let entry = entry?;
            if entry.file_type()?.is_file() {
                artifacts.push(BuildArtifact::new(entry.path()));
            }
        }
        artifacts.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(artifacts)
    }

    /// Cancels any running build and removes the stages from the host.
    /// Later calls to [`build`](Self::build) fail with
    /// [`Pep517Error::Closed`].
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let mut state = self.state.write();
        state.pipeline.cancel("build target closed");
        for id in state.host_stages.drain(..) {
            self.services.host.unregister_stage(id);
        }
        info!(project = %self.project_file.display(), "Build target closed");
    }

    /// Returns true once [`close`](Self::close) has been called.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn ensure_open(&self) -> Result<(), Pep517Error> {
        if self.is_closed() {
            return Err(Pep517Error::Closed);
        }
        Ok(())
    }

    /// Replans if needed and arms `token` on the pipeline to run. Arming
    /// happens under the state lock, so a concurrent `cancel` or
    /// `invalidate` either sees the armed run or precedes the replan check.
    fn prepare_run(&self, token: &Arc<CancellationToken>) -> Result<Arc<Pipeline>, Pep517Error> {
        let current = PyProject::load(&self.project_file)?;

        let mut state = self.state.write();
        let invalidated = self.invalidated.swap(false, Ordering::SeqCst);
        if invalidated || current != state.project {
            info!(invalidated, "Replanning build pipeline");
            match configure(&self.config, &self.project_file, &self.services) {
                Ok(mut next) => {
                    for id in state.host_stages.drain(..) {
                        self.services.host.unregister_stage(id);
                    }
                    next.host_stages = register(&self.services, &next.pipeline);
                    *state = next;
                }
                Err(e) => {
                    warn!(error = %e, "Replanning failed");
                    self.invalidated.store(true, Ordering::SeqCst);
                    return Err(e);
                }
            }
        }
        state.pipeline.arm(Arc::clone(token));
        Ok(Arc::clone(&state.pipeline))
    }

    fn clean_stage(&self, state: &TargetState) -> Result<Arc<dyn Stage>, Pep517Error> {
        let root = state.project.root();
        let builddir = state.backend.builddir(root);
        let Some(template) = state.backend.clean_argv() else {
            return Ok(Arc::new(CleanStage::new(CLEAN_STAGE, builddir)));
        };

        let vars = template_vars(&self.config, root, &builddir);
        let command = render(&template, &vars, root, state.backend.as_ref(), CLEAN_STAGE)?;
        let classifier = self.services.classifiers.get(state.backend.classifier_id());
        Ok(Arc::new(BackendStage::new(
            CLEAN_STAGE,
            command,
            Arc::clone(&self.services.runner),
            classifier,
        )))
    }
}

fn template_vars(config: &TargetConfig, root: &Path, target_dir: &Path) -> TemplateVars {
    TemplateVars::new(root, target_dir)
        .with_python(&config.python)
        .with_venv(root.join(&config.venv_dir))
        .with_backend_arg(config.build_type.backend_arg())
}

fn render(
    template: &CommandTemplate,
    vars: &TemplateVars,
    root: &Path,
    backend: &dyn BuildBackend,
    stage: &str,
) -> Result<CommandSpec, Pep517Error> {
    template
        .to_command(vars, root)
        .ok_or_else(|| Pep517Error::Config(format!("backend '{}' has an empty {stage} command", backend.id())))
}

/// Loads the project and plans its pipeline. Host registration is left to
/// the caller.
fn configure(
    config: &TargetConfig,
    project_file: &Path,
    services: &ResolvedServices,
) -> Result<TargetState, Pep517Error> {
    let project = PyProject::load(project_file)?;
    let backend = services.backends.resolve(&project.build_backend)?;
    if !backend.supports(config.build_type) {
        return Err(BackendError::UnsupportedBuildType {
            backend: backend.display_name().to_string(),
            build_type: config.build_type.to_string(),
        }
        .into());
    }

    let mut builder = PipelineBuilder::new(PIPELINE_NAME)
        .with_config(config.pipeline.clone())
        .with_sink(Arc::clone(&services.sink));
    for spec in declare_stages(config, &project, backend.as_ref(), services)? {
        builder.add_stage(spec);
    }
    let pipeline = Arc::new(builder.build()?);

    Ok(TargetState {
        project,
        backend,
        pipeline,
        host_stages: Vec::new(),
    })
}

/// `prepare → build → install`, each guarded by its own fingerprint.
fn declare_stages(
    config: &TargetConfig,
    project: &PyProject,
    backend: &dyn BuildBackend,
    services: &ResolvedServices,
) -> Result<Vec<StageSpec>, Pep517Error> {
    let root = project.root();
    let venv = root.join(&config.venv_dir);
    let venv_bin = venv.join(VENV_BIN);
    let builddir = backend.builddir(root);
    let vars = template_vars(config, root, &builddir);
    let inputs = backend.byproducts().iter().fold(
        StalenessInputs::new(&project.path, root)
            .with_excluded(&venv)
            .with_excluded(&builddir),
        |inputs, glob| inputs.with_excluded_glob(*glob),
    );

    let stage = |name: &str, command: CommandSpec, classifier: Arc<dyn OutputClassifier>| {
        let command = match config.pipeline.stage_timeout() {
            Some(timeout) => command.with_timeout(timeout),
            None => command,
        };
        BackendStage::new(name, command, Arc::clone(&services.runner), classifier).with_staleness(
            Arc::clone(&services.oracle),
            inputs.clone(),
            Arc::clone(&services.store),
            store_key(&project.path, name),
        )
    };

    let prepare = CommandTemplate::new(["{python}", "-m", "venv", "{venv}"]);
    let prepare = render(&prepare, &vars, root, backend, PREPARE_STAGE)?;

    let build = if backend.has_isolation() {
        render(&backend.build_argv(config.build_type), &vars, root, backend, BUILD_STAGE)?
    } else {
        let template = backend.build_argv(config.build_type).with_program_dir(&venv_bin);
        render(&template, &vars.clone().with_python("python"), root, backend, BUILD_STAGE)?
    };

    let package = project.name.clone().unwrap_or_else(|| root.display().to_string());
    let install = CommandTemplate::new([
        "python",
        "-m",
        "pip",
        "install",
        "--no-deps",
        "--force-reinstall",
        "--no-index",
        "--find-links",
        "{target_dir}",
        package.as_str(),
    ])
    .with_program_dir(&venv_bin);
    let install = render(&install, &vars, root, backend, INSTALL_STAGE)?;

    let pip = services.classifiers.get(Pep517Classifier::ID);
    let frontend = services.classifiers.get(backend.classifier_id());
    Ok(vec![
        StageSpec::of(Arc::new(stage(PREPARE_STAGE, prepare, Arc::clone(&pip)))).with_target_path(&venv),
        StageSpec::of(Arc::new(stage(BUILD_STAGE, build, frontend)))
            .with_predecessor(PREPARE_STAGE)
            .with_target_path(&builddir),
        StageSpec::of(Arc::new(stage(INSTALL_STAGE, install, pip)))
            .with_predecessor(BUILD_STAGE)
            .with_target_path(&venv),
    ])
}

/// Registers the pipeline's stages with the host in plan order.
fn register(services: &ResolvedServices, pipeline: &Pipeline) -> Vec<HostStageId> {
    let plan = pipeline.plan();
    plan.order()
        .into_iter()
        .map(|name| {
            let predecessors: Vec<String> = plan.predecessors(name).into_iter().map(str::to_string).collect();
            let id = services.host.register_stage(name, &predecessors);
            debug!(stage = name, %id, "Registered stage with host");
            id
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::host::MockHostStageRegistry;
    use super::*;
    use crate::backend::{BackendRegistry, BuildType};
    use crate::config::PipelineConfig;
    use crate::core::{ArtifactKind, PipelineStatus};
    use crate::errors::PlanError;
    use crate::events::CollectingDiagnosticsSink;
    use crate::fingerprint::InMemoryFingerprintStore;
    use crate::testing::{
        assert_ran, assert_skipped, ProcessScript, PythonProject, ScriptedProcessRunner, WindowRecorder,
    };
    use mockall::predicate::eq;
    use mockall::Sequence;
    use pretty_assertions::assert_eq;
    use std::sync::atomic::AtomicU64;
    use std::time::Duration;

    fn permissive_host() -> Arc<MockHostStageRegistry> {
        let next = AtomicU64::new(0);
        let mut host = MockHostStageRegistry::new();
        host.expect_register_stage()
            .returning(move |_, _| HostStageId(next.fetch_add(1, Ordering::SeqCst)));
        host.expect_unregister_stage().return_const(());
        Arc::new(host)
    }

    struct Fixture {
        project: PythonProject,
        runner: Arc<ScriptedProcessRunner>,
        store: Arc<InMemoryFingerprintStore>,
        sink: Arc<CollectingDiagnosticsSink>,
    }

    impl Fixture {
        fn new(runner: ScriptedProcessRunner) -> Self {
            Self {
                project: PythonProject::setuptools(),
                runner: Arc::new(runner),
                store: Arc::new(InMemoryFingerprintStore::new()),
                sink: Arc::new(CollectingDiagnosticsSink::new()),
            }
        }

        fn services(&self, host: Arc<dyn HostStageRegistry>) -> TargetServices {
            TargetServices::new(host)
                .with_runner(self.runner.clone())
                .with_store(self.store.clone())
                .with_sink(self.sink.clone())
        }

        fn target(&self) -> BuildTarget {
            self.target_with(TargetConfig::new(self.project.root()))
        }

        fn target_with(&self, config: TargetConfig) -> BuildTarget {
            BuildTarget::initialize(config, self.services(permissive_host())).unwrap()
        }
    }

    #[derive(Debug)]
    struct InPlaceBackend;

    impl BuildBackend for InPlaceBackend {
        fn id(&self) -> &str {
            "in-place"
        }

        fn display_name(&self) -> &str {
            "In Place"
        }

        fn build_types(&self) -> &[BuildType] {
            &[BuildType::Wheel]
        }

        fn builddir_name(&self) -> &str {
            "wheelhouse"
        }

        fn build_argv(&self, _build_type: BuildType) -> CommandTemplate {
            CommandTemplate::new(["{python}", "-m", "pip", "wheel", "--wheel-dir", "{target_dir}", "{project_root}"])
        }

        fn clean_argv(&self) -> Option<CommandTemplate> {
            Some(CommandTemplate::new(["{python}", "-m", "in_place", "clean", "{target_dir}"]))
        }

        fn has_isolation(&self) -> bool {
            false
        }
    }

    #[test]
    fn test_identity() {
        let fixture = Fixture::new(ScriptedProcessRunner::new());
        let target = fixture.target();

        assert_eq!(target.id(), "python_517_build_system");
        assert_eq!(target.display_name(), "Python (pyproject.toml)");
        assert_eq!(target.priority(), 500);
        assert!(target.supports_language("python3"));
        assert!(!target.supports_language("python2"));
        assert_eq!(target.builddir(), fixture.project.root().join("dist"));
        assert_eq!(target.project().name.as_deref(), Some("demo"));
    }

    #[test]
    fn test_initialize_registers_stages_in_order() {
        let fixture = Fixture::new(ScriptedProcessRunner::new());
        let mut host = MockHostStageRegistry::new();
        let mut seq = Sequence::new();
        host.expect_register_stage()
            .withf(|name, preds| name == "prepare" && preds.is_empty())
            .times(1)
            .in_sequence(&mut seq)
            .return_const(HostStageId(10));
        host.expect_register_stage()
            .withf(|name, preds| name == "build" && preds == ["prepare".to_string()])
            .times(1)
            .in_sequence(&mut seq)
            .return_const(HostStageId(11));
        host.expect_register_stage()
            .withf(|name, preds| name == "install" && preds == ["build".to_string()])
            .times(1)
            .in_sequence(&mut seq)
            .return_const(HostStageId(12));
        for id in 10..13 {
            host.expect_unregister_stage().with(eq(HostStageId(id))).times(1).return_const(());
        }

        let target =
            BuildTarget::initialize(TargetConfig::new(fixture.project.pyproject()), fixture.services(Arc::new(host)))
                .unwrap();
        assert_eq!(target.pipeline().plan().order(), vec!["prepare", "build", "install"]);

        target.close();
        target.close();
        assert!(target.is_closed());
    }

    #[test]
    fn test_project_without_build_system_is_refused() {
        let fixture = Fixture::new(ScriptedProcessRunner::new());
        fixture.project.write("pyproject.toml", "[project]\nname = \"demo\"\n");

        let err = BuildTarget::initialize(TargetConfig::new(fixture.project.root()), fixture.services(permissive_host()))
            .unwrap_err();
        assert!(matches!(err, Pep517Error::Backend(BackendError::NotPep517(_))));
    }

    #[test]
    fn test_unknown_backend_is_refused() {
        let fixture = Fixture::new(ScriptedProcessRunner::new());
        let mut host = MockHostStageRegistry::new();
        host.expect_register_stage().never();
        fixture.project.write(
            "pyproject.toml",
            "[build-system]\nrequires = [\"maturin\"]\nbuild-backend = \"maturin\"\n",
        );

        let err = BuildTarget::initialize(TargetConfig::new(fixture.project.root()), fixture.services(Arc::new(host)))
            .unwrap_err();
        assert!(matches!(err, Pep517Error::Backend(BackendError::UnsupportedBackend(ref b)) if b == "maturin"));
    }

    #[test]
    fn test_missing_project_is_unreadable() {
        let dir = tempfile::tempdir().unwrap();
        let err = BuildTarget::initialize(TargetConfig::new(dir.path()), TargetServices::new(permissive_host()))
            .unwrap_err();
        assert!(matches!(err, Pep517Error::Plan(PlanError::ConfigUnreadable { .. })));
    }

    #[tokio::test]
    async fn test_build_runs_the_chain() {
        let fixture = Fixture::new(ScriptedProcessRunner::new());
        let target = fixture.target_with(
            TargetConfig::new(fixture.project.root())
                .with_build_type(BuildType::Wheel)
                .with_python("python3.12"),
        );
        let root = fixture.project.root();

        let outcome = target.build().await.unwrap();

        assert_eq!(outcome.status, PipelineStatus::Succeeded);
        let commands = fixture.runner.invocations();
        assert_eq!(commands.len(), 3);

        let venv = root.join(".venv");
        assert_eq!(commands[0].program, "python3.12");
        assert_eq!(commands[0].args, vec!["-m".to_string(), "venv".to_string(), venv.display().to_string()]);

        assert_eq!(commands[1].program, "python3.12");
        assert_eq!(
            commands[1].args,
            vec![
                "-m".to_string(),
                "build".to_string(),
                "--wheel".to_string(),
                "--outdir".to_string(),
                root.join("dist").display().to_string(),
                root.display().to_string(),
            ]
        );

        assert_eq!(commands[2].program, venv.join(VENV_BIN).join("python").display().to_string());
        assert!(commands[2].args.ends_with(&[
            "--find-links".to_string(),
            root.join("dist").display().to_string(),
            "demo".to_string(),
        ]));
        assert!(commands.iter().all(|c| c.cwd == root));

        assert_eq!(fixture.sink.len(), 3);
        assert_eq!(fixture.store.len(), 3);
        assert_eq!(target.stage_status("install"), Some(StageStatus::Succeeded));
    }

    #[tokio::test]
    async fn test_second_build_is_skipped() {
        let fixture = Fixture::new(ScriptedProcessRunner::new());
        let target = fixture.target();

        assert!(target.build().await.unwrap().is_success());
        let outcome = target.build().await.unwrap();

        for result in &outcome.results {
            assert_skipped(result);
        }
        assert_eq!(fixture.runner.invocation_count(), 3);
    }

    #[tokio::test]
    async fn test_setuptools_byproducts_keep_next_build_fresh() {
        let runner = ScriptedProcessRunner::new().with_script(
            "-m build",
            ProcessScript::exit(0)
                .creating("src/demo.egg-info/PKG-INFO", "Metadata-Version: 2.1\nName: demo\n")
                .creating("build/lib/demo/__init__.py", "VERSION = '1.0'\n"),
        );
        let fixture = Fixture::new(runner);
        let target = fixture.target();

        let first = target.build().await.unwrap();
        assert_eq!(first.rebuilt(), vec!["prepare", "build", "install"]);
        assert!(fixture.project.root().join("src/demo.egg-info/PKG-INFO").is_file());

        let second = target.build().await.unwrap();
        assert!(second.rebuilt().is_empty());
        for result in &second.results {
            assert_skipped(result);
        }
        assert_eq!(fixture.runner.invocation_count(), 3);
    }

    #[tokio::test]
    async fn test_cancel_then_rebuild_never_overlaps_venv_writers() {
        let recorder = WindowRecorder::new();
        let project = PythonProject::setuptools();
        let venv = project.root().join(".venv");
        let runner = ScriptedProcessRunner::new()
            .with_recorder(Arc::clone(&recorder))
            .with_script(
                "-m venv",
                ProcessScript::exit(0).with_delay(Duration::from_millis(200)).writing_to(&venv),
            )
            .with_script(
                "pip install",
                ProcessScript::exit(0).with_delay(Duration::from_millis(10)).writing_to(&venv),
            );
        let fixture = Fixture { project, ..Fixture::new(runner) };
        let target = Arc::new(fixture.target());

        let first = tokio::spawn({
            let target = Arc::clone(&target);
            async move { target.build().await }
        });
        fixture.runner.wait_for_invocation("-m venv").await;
        assert!(target.cancel("superseded"));
        let second = tokio::spawn({
            let target = Arc::clone(&target);
            async move { target.build().await }
        });

        let first = first.await.unwrap().unwrap();
        assert_eq!(first.status, PipelineStatus::Cancelled);
        let second = second.await.unwrap().unwrap();
        assert!(second.is_success());

        assert!(!recorder.any_overlap());
        assert_eq!(recorder.peak_writers(&venv), 1);
        assert_eq!(recorder.windows().len(), 3);
        assert_eq!(fixture.runner.launches_of("-m venv"), 2);
    }

    #[tokio::test]
    async fn test_stage_timeout_reaches_commands() {
        let fixture = Fixture::new(ScriptedProcessRunner::new());
        let config = TargetConfig::new(fixture.project.root())
            .with_pipeline(PipelineConfig::new().with_stage_timeout(90.0));
        let target = fixture.target_with(config);

        target.build().await.unwrap();

        assert!(fixture
            .runner
            .invocations()
            .iter()
            .all(|c| c.timeout == Some(std::time::Duration::from_secs(90))));
    }

    #[tokio::test]
    async fn test_invalidate_cancels_and_replans() {
        let runner = ScriptedProcessRunner::new().with_script("-m build", ProcessScript::exit(0).hold_until_cancelled());
        let fixture = Fixture::new(runner);
        let next = AtomicU64::new(0);
        let mut host = MockHostStageRegistry::new();
        host.expect_register_stage()
            .times(6)
            .returning(move |_, _| HostStageId(next.fetch_add(1, Ordering::SeqCst)));
        for id in 0..3 {
            host.expect_unregister_stage().with(eq(HostStageId(id))).times(1).return_const(());
        }
        let target = Arc::new(
            BuildTarget::initialize(TargetConfig::new(fixture.project.root()), fixture.services(Arc::new(host)))
                .unwrap(),
        );

        let running = tokio::spawn({
            let target = Arc::clone(&target);
            async move { target.build().await }
        });
        fixture.runner.wait_for_invocation("-m build").await;
        assert!(target.invalidate("pyproject.toml changed"));

        let outcome = running.await.unwrap().unwrap();
        assert_eq!(outcome.status, PipelineStatus::Cancelled);
        assert_eq!(outcome.cancel_reason.as_deref(), Some("pyproject.toml changed"));
        assert_eq!(fixture.runner.launches_of("pip install"), 0);

        // The replanned pipeline is a fresh one; the build script still
        // holds, so cancel it again from the outside.
        let running = tokio::spawn({
            let target = Arc::clone(&target);
            async move { target.build().await }
        });
        while fixture.runner.launches_of("-m build") < 2 {
            tokio::task::yield_now().await;
        }
        assert!(target.cancel("stop"));
        let outcome = running.await.unwrap().unwrap();
        assert_eq!(outcome.status, PipelineStatus::Cancelled);
        assert!(!target.cancel("idle"));
    }

    #[tokio::test]
    async fn test_edited_project_replans() {
        let fixture = Fixture::new(ScriptedProcessRunner::new());
        let target = fixture.target();
        let before = target.pipeline();
        target.build().await.unwrap();

        fixture.project.write(
            "pyproject.toml",
            "[build-system]\nrequires = [\"hatchling\"]\nbuild-backend = \"hatchling.build\"\n\n[project]\nname = \"demo\"\nversion = \"2.0\"\n",
        );
        let outcome = target.build().await.unwrap();

        assert!(!Arc::ptr_eq(&before, &target.pipeline()));
        assert_eq!(target.project().version.as_deref(), Some("2.0"));
        assert_eq!(outcome.rebuilt(), vec!["prepare", "build", "install"]);
    }

    #[tokio::test]
    async fn test_deleted_project_fails_before_running() {
        let fixture = Fixture::new(ScriptedProcessRunner::new());
        let target = fixture.target();
        std::fs::remove_file(fixture.project.pyproject()).unwrap();

        let err = target.build().await.unwrap_err();

        assert!(matches!(err, Pep517Error::Plan(PlanError::ConfigUnreadable { .. })));
        assert_eq!(fixture.runner.invocation_count(), 0);
    }

    #[tokio::test]
    async fn test_clean_empties_dist_and_forgets_fingerprints() {
        let fixture = Fixture::new(ScriptedProcessRunner::new());
        let target = fixture.target();
        target.build().await.unwrap();
        fixture.project.write("dist/demo-1.0.tar.gz", "sdist");
        fixture.project.write("dist/demo-1.0-py3-none-any.whl", "wheel");

        let result = target.clean().await.unwrap();

        assert_ran(&result);
        assert_eq!(result.diagnostics.len(), 2);
        assert!(fixture.project.root().join("dist").is_dir());
        assert!(target.artifacts().unwrap().is_empty());
        assert!(fixture.store.is_empty());

        let outcome = target.build().await.unwrap();
        assert_eq!(outcome.rebuilt(), vec!["prepare", "build", "install"]);
    }

    #[tokio::test]
    async fn test_backend_clean_command_is_used() {
        let fixture = Fixture::new(ScriptedProcessRunner::new());
        let mut backends = BackendRegistry::empty();
        backends.register("setuptools.build_meta", Arc::new(InPlaceBackend));
        let target = BuildTarget::initialize(
            TargetConfig::new(fixture.project.root()).with_build_type(BuildType::Wheel),
            fixture.services(permissive_host()).with_backends(backends),
        )
        .unwrap();

        let result = target.clean().await.unwrap();

        assert_ran(&result);
        let commands = fixture.runner.invocations();
        assert_eq!(commands.len(), 1);
        assert_eq!(commands[0].args[..3], ["-m".to_string(), "in_place".to_string(), "clean".to_string()]);
    }

    #[tokio::test]
    async fn test_backend_without_isolation_runs_from_venv() {
        let fixture = Fixture::new(ScriptedProcessRunner::new());
        let mut backends = BackendRegistry::empty();
        backends.register("setuptools.build_meta", Arc::new(InPlaceBackend));
        let target = BuildTarget::initialize(
            TargetConfig::new(fixture.project.root()).with_build_type(BuildType::Wheel),
            fixture.services(permissive_host()).with_backends(backends),
        )
        .unwrap();

        target.build().await.unwrap();

        let build = &fixture.runner.invocations()[1];
        let python = fixture.project.root().join(".venv").join(VENV_BIN).join("python");
        assert_eq!(build.program, python.display().to_string());
        assert_eq!(target.builddir(), fixture.project.root().join("wheelhouse"));
    }

    #[test]
    fn test_unsupported_build_type_is_refused() {
        let fixture = Fixture::new(ScriptedProcessRunner::new());
        let mut backends = BackendRegistry::empty();
        backends.register("setuptools.build_meta", Arc::new(InPlaceBackend));

        let err = BuildTarget::initialize(
            TargetConfig::new(fixture.project.root()).with_build_type(BuildType::Sdist),
            fixture.services(permissive_host()).with_backends(backends),
        )
        .unwrap_err();
        assert!(matches!(err, Pep517Error::Backend(BackendError::UnsupportedBuildType { .. })));
    }

    #[test]
    fn test_artifacts_are_sorted_with_kinds() {
        let fixture = Fixture::new(ScriptedProcessRunner::new());
        let target = fixture.target();
        assert!(target.artifacts().unwrap().is_empty());

        fixture.project.write("dist/demo-1.0.tar.gz", "sdist");
        fixture.project.write("dist/demo-1.0-py3-none-any.whl", "wheel");
        fixture.project.write("dist/notes.txt", "notes");
        fixture.project.write("dist/nested/ignored.whl", "nested");

        let artifacts = target.artifacts().unwrap();
        let listed: Vec<(String, ArtifactKind)> = artifacts.iter().map(|a| (a.file_name(), a.kind)).collect();
        assert_eq!(
            listed,
            vec![
                ("demo-1.0-py3-none-any.whl".to_string(), ArtifactKind::Wheel),
                ("demo-1.0.tar.gz".to_string(), ArtifactKind::Sdist),
                ("notes.txt".to_string(), ArtifactKind::File),
            ]
        );
    }

    #[tokio::test]
    async fn test_closed_target_refuses_work() {
        let fixture = Fixture::new(ScriptedProcessRunner::new());
        let target = fixture.target();
        target.close();

        assert!(matches!(target.build().await, Err(Pep517Error::Closed)));
        assert!(matches!(target.clean().await, Err(Pep517Error::Closed)));
        assert_eq!(fixture.runner.invocation_count(), 0);
    }
}
