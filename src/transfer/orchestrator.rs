//! Restore and save procedures

use crate::cache::{prune_all, should_save, RemoteStore};
use crate::compression::StreamCodec;
use crate::error::{StateError, StateResult};
use crate::orchestration::{BuilderControl, ContainerRuntime};
use crate::pipeline::{ByteSink, ByteSource, PipelineCoordinator};
use crate::session::RestoredKeyStore;
use crate::transfer::{TransferOutcome, TransferPhase, TransferReport, TransferSettings};
use std::path::Path;
use tokio::fs;
use tracing::{debug, info, warn};

/// Callback invoked on every phase transition
pub type PhaseObserver = Box<dyn Fn(TransferPhase) + Send + Sync>;

/// Label of the local archive endpoint in pipelines
const ARCHIVE_STAGE: &str = "archive";

/// Moves builder state between a container and a remote store
pub struct StateTransfer<'a> {
    runtime: &'a dyn ContainerRuntime,
    builder: &'a dyn BuilderControl,
    store: &'a dyn RemoteStore,
    codec: &'a dyn StreamCodec,
    keys: &'a RestoredKeyStore,
    coordinator: PipelineCoordinator,
    observer: Option<PhaseObserver>,
}

impl<'a> StateTransfer<'a> {
    /// Create a transfer over the given collaborators
    pub fn new(
        runtime: &'a dyn ContainerRuntime,
        builder: &'a dyn BuilderControl,
        store: &'a dyn RemoteStore,
        codec: &'a dyn StreamCodec,
        keys: &'a RestoredKeyStore,
    ) -> Self {
        Self {
            runtime,
            builder,
            store,
            codec,
            keys,
            coordinator: PipelineCoordinator::new(),
            observer: None,
        }
    }

    /// Notify `observer` on every phase transition
    pub fn with_observer(mut self, observer: PhaseObserver) -> Self {
        self.observer = Some(observer);
        self
    }

    /// Use a custom pipeline coordinator
    pub fn with_coordinator(mut self, coordinator: PipelineCoordinator) -> Self {
        self.coordinator = coordinator;
        self
    }

    /// Restore the best matching store entry into the builder
    pub async fn restore(&self, settings: &TransferSettings) -> TransferReport {
        let mut report = TransferReport::new();

        match self.run_restore(settings, &mut report).await {
            Ok(Some(key)) => {
                report.outcome = TransferOutcome::Success;
                report.key = Some(key);
            }
            Ok(None) => report.outcome = TransferOutcome::CacheMiss,
            Err(e) => self.fail(&mut report, e),
        }

        self.finish(settings, report).await
    }

    /// Save the builder state under the primary key if it changed
    pub async fn save(&self, settings: &TransferSettings) -> TransferReport {
        let mut report = TransferReport::new();

        if let Err(e) = self.run_save(settings, &mut report).await {
            self.fail(&mut report, e);
        }

        self.finish(settings, report).await
    }

    async fn run_restore(
        &self,
        settings: &TransferSettings,
        report: &mut TransferReport,
    ) -> StateResult<Option<String>> {
        self.enter(report, TransferPhase::Quiescing);
        self.builder.stop(&settings.builder).await?;
        let container = self.runtime.resolve(&settings.container).await?;

        self.enter(report, TransferPhase::Restoring);
        let archive = settings.archive_path.as_path();
        let key = &settings.key;

        let matched = match self
            .store
            .restore(std::slice::from_ref(&settings.archive_path), key.primary(), key.fallbacks())
            .await
        {
            Ok(matched) => matched,
            Err(e) => {
                remove_archive(archive).await;
                return Err(e);
            }
        };

        let Some(matched) = matched else {
            info!("No cache entry matches {}", key.primary());
            if let Err(e) = self.keys.clear(&settings.builder).await {
                warn!("Failed to clear restored key: {}", e);
            }
            return Ok(None);
        };

        if matched == key.primary() {
            info!("Cache hit for {}", matched);
        } else {
            info!("Cache hit for fallback {}", matched);
        }
        report.archive_bytes = fs::metadata(archive).await.ok().map(|m| m.len());

        let result = self.inject_creating_target(&container, settings).await;
        remove_archive(archive).await;
        result?;

        if let Err(e) = self.keys.record(&settings.builder, &matched).await {
            warn!("Failed to record restored key: {}", e);
        }
        Ok(Some(matched))
    }

    async fn run_save(
        &self,
        settings: &TransferSettings,
        report: &mut TransferReport,
    ) -> StateResult<()> {
        self.enter(report, TransferPhase::Quiescing);
        let primary = settings.key.primary();
        report.key = Some(primary.to_string());

        let last = self.last_restored_key(settings).await;
        if !should_save(last.as_deref(), primary, settings.rewrite) {
            info!("Cache restored from {}, skipping save", primary);
            report.skipped = true;
            return Ok(());
        }

        let prune = prune_all(self.builder, &settings.builder, &settings.keep).await;
        if let Some(failure) = prune.first_failure() {
            warn!(
                "Pruning {} failed, saving anyway: {}",
                failure.category, failure.reason
            );
        }
        report.prune = Some(prune);
        self.report_disk_usage(&settings.builder).await;

        self.builder.stop(&settings.builder).await?;
        let container = self.runtime.resolve(&settings.container).await?;

        self.enter(report, TransferPhase::Saving);
        let archive = settings.archive_path.as_path();

        if let Err(e) = self.extract(&container, settings).await {
            remove_archive(archive).await;
            return Err(e);
        }
        report.archive_bytes = fs::metadata(archive).await.ok().map(|m| m.len());

        let saved = self
            .store
            .save(std::slice::from_ref(&settings.archive_path), primary)
            .await;
        remove_archive(archive).await;

        match saved {
            Ok(()) => {
                info!("Saved cache entry {}", primary);
                Ok(())
            }
            Err(StateError::CacheKeyExists(key)) => {
                info!("Cache entry {} already exists, not overwriting", key);
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// archive file -> decode -> container
    async fn inject(&self, container: &str, settings: &TransferSettings) -> StateResult<()> {
        let file = fs::File::open(&settings.archive_path).await.map_err(|e| {
            StateError::io(format!("opening {}", settings.archive_path.display()), e)
        })?;

        let stats = self
            .coordinator
            .run(
                ByteSource::reader(ARCHIVE_STAGE, file),
                vec![self.codec.decode(settings.window)],
                self.runtime.archive_sink(container, &settings.restore_dir),
            )
            .await
            .map_err(|e| {
                self.runtime
                    .classify_copy_failure(settings.container.name(), &settings.restore_dir, e)
            })?;

        debug!("Injected {} bytes into {}", stats.bytes_out(), settings.container);
        Ok(())
    }

    /// Inject, creating the restore directory and retrying once if it is missing
    async fn inject_creating_target(
        &self,
        container: &str,
        settings: &TransferSettings,
    ) -> StateResult<()> {
        match self.inject(container, settings).await {
            Err(StateError::PathNotFound { .. }) => {
                info!("Creating {} in {}", settings.restore_dir, settings.container);
                self.runtime
                    .create_directory(container, &settings.restore_dir)
                    .await?;
                self.inject(container, settings).await
            }
            result => result,
        }
    }

    /// container -> encode -> archive file
    async fn extract(&self, container: &str, settings: &TransferSettings) -> StateResult<()> {
        let archive = &settings.archive_path;
        if let Some(parent) = archive.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| StateError::io(format!("creating {}", parent.display()), e))?;
        }
        let file = fs::File::create(archive)
            .await
            .map_err(|e| StateError::io(format!("creating {}", archive.display()), e))?;

        let stats = self
            .coordinator
            .run(
                self.runtime.archive_source(container, &settings.state_dir),
                vec![self.codec.encode(settings.window)],
                ByteSink::writer(ARCHIVE_STAGE, file),
            )
            .await
            .map_err(|e| {
                self.runtime
                    .classify_copy_failure(settings.container.name(), &settings.state_dir, e)
            })?;

        debug!("Extracted {} bytes from {}", stats.bytes_in(), settings.container);
        Ok(())
    }

    async fn last_restored_key(&self, settings: &TransferSettings) -> Option<String> {
        if let Some(key) = &settings.restored_key {
            return Some(key.clone());
        }
        match self.keys.load(&settings.builder).await {
            Ok(record) => record.map(|r| r.key),
            Err(e) => {
                warn!("Could not read restored key: {}", e);
                None
            }
        }
    }

    async fn report_disk_usage(&self, builder: &str) {
        match self.builder.disk_usage(builder).await {
            Ok(usage) => {
                for line in usage.lines().filter(|l| !l.trim().is_empty()) {
                    info!("{}", line);
                }
            }
            Err(e) => warn!("Failed to report disk usage: {}", e),
        }
    }

    /// Resume the builder and close out the report
    async fn finish(
        &self,
        settings: &TransferSettings,
        mut report: TransferReport,
    ) -> TransferReport {
        self.enter(&mut report, TransferPhase::Resuming);

        if settings.resume {
            match self.builder.bootstrap(&settings.builder).await {
                Ok(()) => self.report_disk_usage(&settings.builder).await,
                Err(e) => {
                    warn!("Failed to resume builder {}: {}", settings.builder, e);
                    if report.failure.is_none() {
                        report.outcome = TransferOutcome::from_error(&e);
                    }
                    report.resume_failure = Some(e);
                }
            }
        } else {
            info!("Builder resume disabled, leaving {} stopped", settings.builder);
        }

        let last = if report.failure.is_some() || report.resume_failure.is_some() {
            TransferPhase::Failed
        } else {
            TransferPhase::Done
        };
        self.enter(&mut report, last);
        report
    }

    fn fail(&self, report: &mut TransferReport, err: StateError) {
        warn!("Transfer failed: {}", err);
        report.outcome = TransferOutcome::from_error(&err);
        report.failure = Some(err);
    }

    fn enter(&self, report: &mut TransferReport, phase: TransferPhase) {
        debug!("Entering phase {}", phase);
        report.phases.push(phase);
        if let Some(observer) = &self.observer {
            observer(phase);
        }
    }
}

async fn remove_archive(path: &Path) {
    match fs::remove_file(path).await {
        Ok(()) => debug!("Removed {}", path.display()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!("Failed to remove {}: {}", path.display(), e),
    }
}
