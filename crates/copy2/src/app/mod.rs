mod async_helpers;
mod auto_update;
mod history;
mod update;

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use copy2_core::{GitHubReleases, HelperScript, ReleaseSource, ScriptError, UpdateTarget, VersionTriple};
use copy2_platform::AppPaths;
use copy2_store::{CapacityReport, ProtectedStore, StoreFiles};
use crossbeam_channel::{Receiver, Sender};
use log::{debug, warn};

use crate::error::AppError;
use crate::frontend::Frontend;
use crate::logging::set_debug_logging;
use crate::message::Message;
use crate::notices::{Notice, RepeatingWarning, WarnOnce};
use crate::settings::AppSettings;

pub use auto_update::UpdatePhase;

/// Facts about the running build that decide which update paths exist.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BuildInfo {
    pub version: VersionTriple,
    /// Declared at build time through the `self-contained` feature.
    pub self_contained: bool,
}

impl BuildInfo {
    pub fn current() -> Self {
        Self {
            version: VersionTriple::current(),
            self_contained: cfg!(feature = "self-contained"),
        }
    }
}

/// Process-level side effects, replaceable in tests.
#[derive(Clone, Copy)]
pub struct SystemHooks {
    pub launch_script: fn(&HelperScript) -> Result<(), ScriptError>,
    pub open_url: fn(&str) -> std::io::Result<()>,
    pub update_target: fn() -> std::io::Result<UpdateTarget>,
}

fn open_in_browser(url: &str) -> std::io::Result<()> {
    open::that(url)
}

impl Default for SystemHooks {
    fn default() -> Self {
        Self {
            launch_script: HelperScript::launch,
            open_url: open_in_browser,
            update_target: UpdateTarget::current,
        }
    }
}

enum Dispatch {
    Progress(Message),
    Complete(Message),
}

/// Forwards intermediate results of a running task to the interactive thread.
#[derive(Clone)]
struct ProgressSink(Sender<Dispatch>);

impl ProgressSink {
    fn send(&self, message: Message) {
        let _ = self.0.send(Dispatch::Progress(message));
    }
}

/// Application state. Owned by the interactive thread, which is the only
/// place the store, settings, and update phase are mutated; background
/// work reports back through [`Message`]s.
pub struct App {
    pub(crate) settings: AppSettings,
    pub(crate) paths: AppPaths,
    pub(crate) store: ProtectedStore,
    files: StoreFiles,
    frontend: Box<dyn Frontend>,
    warn_once: WarnOnce,
    pub(crate) update_phase: UpdatePhase,
    build: BuildInfo,
    hooks: SystemHooks,
    http_client: reqwest::Client,
    releases: Arc<dyn ReleaseSource>,
    runtime: tokio::runtime::Runtime,
    sender: Sender<Dispatch>,
    receiver: Receiver<Dispatch>,
    in_flight: usize,
}

impl App {
    pub fn new(
        paths: AppPaths,
        settings: AppSettings,
        frontend: Box<dyn Frontend>,
    ) -> Result<Self, AppError> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .thread_name("copy2-worker")
            .enable_all()
            .build()
            .map_err(|error| {
                AppError::message(format!("failed to start background worker: {error}"))
            })?;

        let http_client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(settings.http_timeout_secs))
            .user_agent(format!("copy2/{}", env!("CARGO_PKG_VERSION")))
            .build()
            .unwrap_or_default();
        let releases = release_source(&http_client, &settings);

        let files = StoreFiles {
            history: paths.history_file(),
            favorites: paths.favorites_file(),
            pins: paths.pins_file(),
            tags: paths.tags_file(),
        };
        let store = files.load(settings.capacity());
        debug!("Loaded {} history entries", store.len());

        let (sender, receiver) = crossbeam_channel::unbounded();

        Ok(Self {
            settings,
            paths,
            store,
            files,
            frontend,
            warn_once: WarnOnce::default(),
            update_phase: UpdatePhase::Idle,
            build: BuildInfo::current(),
            hooks: SystemHooks::default(),
            http_client,
            releases,
            runtime,
            sender,
            receiver,
            in_flight: 0,
        })
    }

    #[cfg(test)]
    #[must_use]
    pub fn with_build(mut self, build: BuildInfo) -> Self {
        self.build = build;
        self
    }

    #[cfg(test)]
    #[must_use]
    pub fn with_hooks(mut self, hooks: SystemHooks) -> Self {
        self.hooks = hooks;
        self
    }

    #[cfg(test)]
    #[must_use]
    pub fn with_release_source(mut self, releases: Arc<dyn ReleaseSource>) -> Self {
        self.releases = releases;
        self
    }

    pub fn build(&self) -> BuildInfo {
        self.build
    }

    pub fn should_exit(&self) -> bool {
        matches!(self.update_phase, UpdatePhase::Exiting)
    }

    /// Replace the settings and re-apply everything that depends on them.
    /// The store is evicted against the new soft cap immediately.
    pub fn apply_settings(&mut self, mut settings: AppSettings) -> Result<CapacityReport, AppError> {
        let capacity = settings.capacity();
        settings.max_history = capacity.soft();

        let report = self.store.apply_capacity_change(capacity);
        self.report_capacity(&report);

        if settings.debug_logging != self.settings.debug_logging {
            set_debug_logging(settings.debug_logging);
        }
        if settings.update_repository != self.settings.update_repository
            || settings.asset_hint != self.settings.asset_hint
        {
            self.releases = release_source(&self.http_client, &settings);
        }

        self.settings = settings;
        self.settings
            .save(&self.paths)
            .map_err(|error| AppError::settings_failed("save", error))?;
        if !report.evicted.is_empty() {
            self.persist_history()?;
        }
        Ok(report)
    }

    pub(crate) fn notify(&mut self, notice: Notice) {
        self.frontend.notify(notice);
    }

    pub(crate) fn warn_once(&mut self, warning: RepeatingWarning, text: impl Into<String>) {
        if self.warn_once.first(warning) {
            self.frontend.notify(Notice::warning(text));
        }
    }

    pub(crate) fn report_capacity(&mut self, report: &CapacityReport) {
        if !report.target_reached {
            self.warn_once(
                RepeatingWarning::ProtectedOverSoftCap,
                format!(
                    "{} protected entries exceed max history of {}; unprotect some to make room",
                    report.protected_count,
                    report.capacity.soft()
                ),
            );
        }
        if report.protected_exceeds_hard_cap {
            warn!(
                "{} protected entries exceed the hard cap of {}",
                report.protected_count,
                report.capacity.hard()
            );
            self.warn_once(
                RepeatingWarning::ProtectedOverHardCap,
                format!(
                    "{} protected entries exceed the limit of {}; they are kept, but nothing new can be saved",
                    report.protected_count,
                    report.capacity.hard()
                ),
            );
        }
    }

    /// Run `task` on the background worker. Its message comes back to
    /// [`App::update`] through [`App::run_until_idle`].
    fn spawn<F>(&mut self, task: F)
    where
        F: Future<Output = Message> + Send + 'static,
    {
        self.in_flight += 1;
        let sender = self.sender.clone();
        self.runtime.spawn(async move {
            let message = match tokio::spawn(task).await {
                Ok(message) => message,
                Err(error) => {
                    Message::TaskFailed(AppError::message(format!("background task failed: {error}")))
                }
            };
            let _ = sender.send(Dispatch::Complete(message));
        });
    }

    fn progress_sink(&self) -> ProgressSink {
        ProgressSink(self.sender.clone())
    }

    /// Handle messages on the calling (interactive) thread until no
    /// background task is left.
    pub fn run_until_idle(&mut self) {
        while self.in_flight > 0 {
            let Ok(dispatch) = self.receiver.recv() else {
                break;
            };
            match dispatch {
                Dispatch::Progress(message) => self.update(message),
                Dispatch::Complete(message) => {
                    self.in_flight -= 1;
                    self.update(message);
                }
            }
        }
    }
}

fn release_source(client: &reqwest::Client, settings: &AppSettings) -> Arc<dyn ReleaseSource> {
    Arc::new(GitHubReleases::new(
        client.clone(),
        &settings.update_repository,
        settings.asset_hint.clone(),
    ))
}

#[cfg(test)]
pub(crate) fn test_app(frontend: crate::frontend::recording::RecordingFrontend) -> (tempfile::TempDir, App) {
    let temp_dir = tempfile::tempdir().expect("temporary directory should be created");
    let paths = AppPaths::rooted_at(temp_dir.path());
    let settings = AppSettings {
        max_history: 5,
        asset_hint: None,
        ..AppSettings::default()
    };
    let app = App::new(paths, settings, Box::new(frontend)).expect("app should start");
    (temp_dir, app)
}
