use crate::{
    archive,
    error::{UpdError, UpdResult},
    github::{AssetTransfer, ReleaseContext, ReleaseLookup},
    process::ProcessControl,
    schedule::{ScheduleGate, ScheduleStore},
    sync::{FileSync, SyncReport, staging_segment_for},
    tag::{self, Tag, TagStatus},
    utils::{self, is_contained},
};
use std::path::{Component, Path, PathBuf};
use std::time::Duration;

/// Where an update cycle currently stands. Phases only move forward and
/// `Failed` is reachable from every non-terminal phase.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum UpdatePhase {
    #[default]
    Idle,
    Checking,
    Downloading,
    Extracting,
    AwaitingCallerExit,
    Syncing,
    Relaunching,
    Done,
    Failed(String),
}

impl UpdatePhase {
    fn rank(&self) -> u8 {
        match self {
            Self::Idle => 0,
            Self::Checking => 1,
            Self::Downloading => 2,
            Self::Extracting => 3,
            Self::AwaitingCallerExit => 4,
            Self::Syncing => 5,
            Self::Relaunching => 6,
            Self::Done | Self::Failed(_) => 7,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Failed(_))
    }
}

impl std::fmt::Display for UpdatePhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Failed(reason) => write!(f, "Failed({})", reason),
            other => write!(f, "{:?}", other),
        }
    }
}

#[derive(Debug, Default)]
pub struct PhaseTracker {
    phase: UpdatePhase,
}

impl PhaseTracker {
    pub fn phase(&self) -> &UpdatePhase {
        &self.phase
    }

    pub fn advance(&mut self, next: UpdatePhase) -> UpdResult<()> {
        if self.phase.is_terminal() || next.rank() <= self.phase.rank() {
            return Err(UpdError::Error(format!(
                "Invalid update transition {} -> {}",
                self.phase, next
            )));
        }
        log::debug!("Update phase {} -> {}", self.phase, next);
        self.phase = next;
        Ok(())
    }

    /// Records `err` as the terminal failure and hands it back.
    pub fn fail(&mut self, err: UpdError) -> UpdError {
        if !self.phase.is_terminal() {
            log::debug!("Update phase {} failed: {}", self.phase, err);
            self.phase = UpdatePhase::Failed(err.to_string());
        }
        err
    }
}

#[derive(Debug, Clone)]
pub struct FetchRequest {
    pub owner: String,
    pub repo: String,
    pub current: Tag,
    /// Download directory, relative to `working_dir`
    pub temp_dir: PathBuf,
    pub working_dir: PathBuf,
    pub verify: bool,
    pub download: bool,
    pub extract: bool,
    pub prerelease: bool,
    /// Skip the schedule gate (the check is still recorded)
    pub force: bool,
}

#[derive(Debug, Clone)]
pub struct FetchReport {
    pub context: ReleaseContext,
    pub status: Option<TagStatus>,
    pub asset_path: Option<PathBuf>,
    pub extracted_root: Option<PathBuf>,
}

/// Phase one: decide whether to update and stage the new release locally.
pub struct Updater<L, T, S> {
    lookup: L,
    transfer: T,
    gate: ScheduleGate<S>,
    tracker: PhaseTracker,
}

impl<L: ReleaseLookup, T: AssetTransfer, S: ScheduleStore> Updater<L, T, S> {
    pub fn new(lookup: L, transfer: T, gate: ScheduleGate<S>) -> Self {
        Self {
            lookup,
            transfer,
            gate,
            tracker: PhaseTracker::default(),
        }
    }

    #[allow(dead_code)]
    pub fn phase(&self) -> &UpdatePhase {
        self.tracker.phase()
    }

    pub fn fetch(&mut self, request: &FetchRequest, now: i64) -> UpdResult<FetchReport> {
        match self.run_fetch(request, now) {
            Ok(report) => {
                self.tracker.advance(UpdatePhase::Done)?;
                Ok(report)
            }
            Err(err) => Err(self.tracker.fail(err)),
        }
    }

    fn run_fetch(&mut self, request: &FetchRequest, now: i64) -> UpdResult<FetchReport> {
        self.tracker.advance(UpdatePhase::Checking)?;
        if request.force {
            log::info!("Schedule gate bypassed");
        } else if !self.gate.should_check(now) {
            return Err(UpdError::ScheduleThrottled(self.gate.remaining(now)));
        }
        // recorded before the remote call so a crash still counts as a check
        self.gate.record_check(now);

        let context = self
            .lookup
            .latest(&request.owner, &request.repo, request.prerelease)?
            .ok_or_else(|| {
                UpdError::LookupFailed(format!(
                    "No suitable release found for {}/{}",
                    request.owner, request.repo
                ))
            })?;
        log::info!(
            "Latest release of {}/{} is {} ({})",
            context.owner,
            context.repo,
            context.latest_tag,
            context.asset_name
        );
        let mut report = FetchReport {
            context,
            status: None,
            asset_path: None,
            extracted_root: None,
        };

        if request.verify {
            let status = tag::compare(&report.context.latest_tag, &request.current);
            log::info!(
                "Remote {} vs local {}: {}",
                report.context.latest_tag,
                request.current,
                status
            );
            report.status = Some(status);
            if status != TagStatus::Newer {
                return Ok(report);
            }
        }

        if request.download {
            self.tracker.advance(UpdatePhase::Downloading)?;
            let asset_path = self.download(&report.context, request)?;
            report.asset_path = Some(asset_path);
        }

        if request.extract {
            self.tracker.advance(UpdatePhase::Extracting)?;
            let asset_path = report.asset_path.as_deref().ok_or_else(|| {
                UpdError::ArchiveError("Nothing to extract, the asset was not downloaded".into())
            })?;
            let root = archive::extract_asset(asset_path)?;
            log::info!("Extracted update to {}", root.display());
            report.extracted_root = Some(root);
        }
        Ok(report)
    }

    fn download(&self, context: &ReleaseContext, request: &FetchRequest) -> UpdResult<PathBuf> {
        if context.asset_url.is_empty() {
            return Err(UpdError::TransferFailed("Release asset has no URL".into()));
        }
        let mut name = Path::new(&context.asset_name).components();
        if !matches!((name.next(), name.next()), (Some(Component::Normal(_)), None)) {
            return Err(UpdError::FileSystemError(format!(
                "Asset name '{}' is not a plain file name",
                context.asset_name
            )));
        }
        let temp_dir = prepare_temp_dir(&request.working_dir, &request.temp_dir)?;
        let destination = temp_dir.join(&context.asset_name);
        self.transfer.transfer(&context.asset_url, &destination)?;
        Ok(destination)
    }
}

/// Resolves and empties the download directory.
///
/// The directory must be a relative path strictly inside `working_dir`, since
/// it is wiped when not empty.
pub fn prepare_temp_dir(working_dir: &Path, temp_dir: &Path) -> UpdResult<PathBuf> {
    if temp_dir.as_os_str().is_empty() || !temp_dir.is_relative() || !is_contained(temp_dir) {
        return Err(UpdError::FileSystemError(format!(
            "Temporary directory '{}' must be a relative path inside the working directory",
            temp_dir.display()
        )));
    }
    if utils::normalize_relative(temp_dir).as_os_str().is_empty() {
        return Err(UpdError::FileSystemError(
            "Temporary directory must not be the working directory itself".into(),
        ));
    }
    let path = working_dir.join(temp_dir);
    if path.exists() {
        if !path.is_dir() {
            return Err(UpdError::FileSystemError(format!(
                "Temporary path {} is not a directory",
                path.display()
            )));
        }
        if std::fs::read_dir(&path)?.next().is_some() {
            log::info!("Clearing temporary directory {}", path.display());
            utils::rimraf(&path)?;
        }
    }
    std::fs::create_dir_all(&path)?;
    Ok(path)
}

/// Starts the apply agent shipped inside `extracted_root`.
///
/// The agent runs from the extracted tree so it never overwrites its own
/// executable, and syncs that tree into `target` once `pid` has exited. Its
/// output lands in `log_file`, which should sit outside `extracted_root` so the
/// sync does not copy it into the installation.
pub fn request_apply<P: ProcessControl>(
    process: &P,
    extracted_root: &Path,
    updater_name: &str,
    target: &Path,
    pid: u32,
    caller: Option<&Path>,
    log_file: Option<&Path>,
) -> UpdResult<()> {
    if !extracted_root.is_dir() {
        return Err(UpdError::FileSystemError(format!(
            "Invalid root asset path {}",
            extracted_root.display()
        )));
    }
    let updater = extracted_root.join(updater_name);
    if !updater.is_file() {
        return Err(UpdError::FileSystemError(format!(
            "Invalid updater path {}",
            updater.display()
        )));
    }
    let mut args = vec![
        "apply".to_string(),
        "--target".to_string(),
        target.display().to_string(),
        "--pid".to_string(),
        pid.to_string(),
    ];
    if let Some(caller) = caller {
        args.push("--caller".to_string());
        args.push(caller.display().to_string());
    }
    process.launch(&updater, &args, extracted_root, log_file)
}

#[derive(Debug, Clone)]
pub struct ApplyRequest {
    pub target: PathBuf,
    /// Process to wait for; 0 skips the wait
    pub pid: u32,
    pub caller: Option<PathBuf>,
    pub caller_args: Vec<String>,
    /// Directory the agent runs from; its first segment below `target` is
    /// the staging segment
    pub working_dir: PathBuf,
    /// Extracted update tree, relative to `working_dir`
    pub source: PathBuf,
    /// Dynamic-files manifest, relative to `target`
    pub manifest: PathBuf,
    pub timeout: Duration,
    pub strict: bool,
}

/// Phase two: swap the installation files once the caller is gone.
pub struct Applier<P> {
    process: P,
    tracker: PhaseTracker,
}

impl<P: ProcessControl> Applier<P> {
    pub fn new(process: P) -> Self {
        Self {
            process,
            tracker: PhaseTracker::default(),
        }
    }

    #[allow(dead_code)]
    pub fn phase(&self) -> &UpdatePhase {
        self.tracker.phase()
    }

    pub fn apply(&mut self, request: &ApplyRequest) -> UpdResult<SyncReport> {
        match self.run_apply(request) {
            Ok(report) => {
                self.tracker.advance(UpdatePhase::Done)?;
                Ok(report)
            }
            Err(err) => Err(self.tracker.fail(err)),
        }
    }

    fn run_apply(&mut self, request: &ApplyRequest) -> UpdResult<SyncReport> {
        let target = &request.target;
        if !target.is_absolute() {
            return Err(UpdError::FileSystemError(format!(
                "Target path {} must be absolute",
                target.display()
            )));
        }
        if !target.is_dir() {
            return Err(UpdError::FileSystemError(format!(
                "Invalid target path {}",
                target.display()
            )));
        }
        let staging = staging_segment_for(target, &request.working_dir)?;

        self.tracker.advance(UpdatePhase::AwaitingCallerExit)?;
        if request.pid != 0 {
            self.process.wait_for_exit(request.pid, request.timeout)?;
        }

        self.tracker.advance(UpdatePhase::Syncing)?;
        let source = request.working_dir.join(&request.source);
        let manifest = target.join(&request.manifest);
        let report = FileSync::new(target, &source, Some(&manifest), &staging)?
            .with_strict(request.strict)
            .apply()?;

        if let Some(caller) = &request.caller {
            self.tracker.advance(UpdatePhase::Relaunching)?;
            self.process.launch(caller, &request.caller_args, target, None)?;
        }
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schedule::ScheduleRecord;
    use std::cell::{Cell, RefCell};
    use std::io::Write;
    use std::rc::Rc;
    use tempfile::TempDir;

    const NOW: i64 = 1_700_000_000;
    const DELAY: Duration = Duration::from_secs(2 * 3600);

    struct FakeLookup {
        context: Option<ReleaseContext>,
        calls: Rc<Cell<usize>>,
    }

    impl ReleaseLookup for FakeLookup {
        fn latest(&self, _: &str, _: &str, _: bool) -> UpdResult<Option<ReleaseContext>> {
            self.calls.set(self.calls.get() + 1);
            Ok(self.context.clone())
        }
    }

    struct FailingLookup;

    impl ReleaseLookup for FailingLookup {
        fn latest(&self, _: &str, _: &str, _: bool) -> UpdResult<Option<ReleaseContext>> {
            Err(UpdError::LookupFailed("network down".into()))
        }
    }

    /// Serves a zip with `app/updatr` and `app/data.txt`.
    struct ZipTransfer {
        calls: Rc<Cell<usize>>,
    }

    impl AssetTransfer for ZipTransfer {
        fn transfer(&self, _url: &str, destination: &Path) -> UpdResult<()> {
            self.calls.set(self.calls.get() + 1);
            let file = std::fs::File::create(destination)?;
            let mut writer = zip::ZipWriter::new(file);
            let options = zip::write::SimpleFileOptions::default();
            writer.start_file("app/updatr", options)?;
            writer.write_all(b"agent")?;
            writer.start_file("app/data.txt", options)?;
            writer.write_all(b"new data")?;
            writer.finish()?;
            Ok(())
        }
    }

    #[derive(Clone, Default)]
    struct MemoryStore(Rc<RefCell<Option<ScheduleRecord>>>);

    impl ScheduleStore for MemoryStore {
        fn load(&self) -> Option<ScheduleRecord> {
            *self.0.borrow()
        }
        fn save(&self, record: &ScheduleRecord) -> UpdResult<()> {
            *self.0.borrow_mut() = Some(*record);
            Ok(())
        }
    }

    #[derive(Default)]
    struct FakeProcess {
        timeout: bool,
        waited: RefCell<Vec<u32>>,
        launched: RefCell<Vec<(PathBuf, Vec<String>, PathBuf, Option<PathBuf>)>>,
    }

    impl ProcessControl for &FakeProcess {
        fn wait_for_exit(&self, pid: u32, timeout: Duration) -> UpdResult<()> {
            self.waited.borrow_mut().push(pid);
            if self.timeout {
                Err(UpdError::ProcessWaitTimeout { pid, timeout })
            } else {
                Ok(())
            }
        }

        fn launch(
            &self,
            executable: &Path,
            args: &[String],
            working_dir: &Path,
            output: Option<&Path>,
        ) -> UpdResult<()> {
            self.launched.borrow_mut().push((
                executable.to_path_buf(),
                args.to_vec(),
                working_dir.to_path_buf(),
                output.map(Path::to_path_buf),
            ));
            Ok(())
        }
    }

    fn context(tag: Tag) -> ReleaseContext {
        ReleaseContext {
            owner: "owner".into(),
            repo: "repo".into(),
            asset_name: "app-linux-64.zip".into(),
            asset_url: "https://example.com/app-linux-64.zip".into(),
            latest_tag: tag,
        }
    }

    fn request(dir: &Path, current: Tag) -> FetchRequest {
        FetchRequest {
            owner: "owner".into(),
            repo: "repo".into(),
            current,
            temp_dir: PathBuf::from("temp"),
            working_dir: dir.to_path_buf(),
            verify: true,
            download: true,
            extract: true,
            prerelease: false,
            force: false,
        }
    }

    struct Harness {
        updater: Updater<FakeLookup, ZipTransfer, MemoryStore>,
        store: MemoryStore,
        lookups: Rc<Cell<usize>>,
        transfers: Rc<Cell<usize>>,
    }

    fn harness(remote: Tag) -> Harness {
        let store = MemoryStore::default();
        let lookups = Rc::new(Cell::new(0));
        let transfers = Rc::new(Cell::new(0));
        let updater = Updater::new(
            FakeLookup {
                context: Some(context(remote)),
                calls: lookups.clone(),
            },
            ZipTransfer {
                calls: transfers.clone(),
            },
            ScheduleGate::new(store.clone(), DELAY),
        );
        Harness {
            updater,
            store,
            lookups,
            transfers,
        }
    }

    #[test]
    fn newer_release_is_downloaded_and_extracted() {
        let dir = TempDir::new().unwrap();
        let mut h = harness(Tag::new(0, 9, 3));

        let report = h
            .updater
            .fetch(&request(dir.path(), Tag::new(0, 9, 0)), NOW)
            .unwrap();

        assert_eq!(report.status, Some(TagStatus::Newer));
        assert_eq!(
            report.asset_path.as_deref(),
            Some(dir.path().join("temp/app-linux-64.zip").as_path())
        );
        let root = report.extracted_root.unwrap();
        assert_eq!(root, dir.path().join("temp/app"));
        assert_eq!(std::fs::read_to_string(root.join("data.txt")).unwrap(), "new data");
        assert_eq!(h.transfers.get(), 1);
        assert_eq!(h.updater.phase(), &UpdatePhase::Done);
    }

    #[test]
    fn same_release_halts_before_download() {
        let dir = TempDir::new().unwrap();
        let mut h = harness(Tag::new(0, 9, 3));

        let report = h
            .updater
            .fetch(&request(dir.path(), Tag::new(0, 9, 3)), NOW)
            .unwrap();

        assert_eq!(report.status, Some(TagStatus::Same));
        assert!(report.asset_path.is_none());
        assert_eq!(h.transfers.get(), 0);
        assert!(!dir.path().join("temp").exists());
    }

    #[test]
    fn without_verify_downloads_regardless_of_tag() {
        let dir = TempDir::new().unwrap();
        let mut h = harness(Tag::new(0, 1, 0));
        let mut req = request(dir.path(), Tag::new(1, 0, 0));
        req.verify = false;
        req.extract = false;

        let report = h.updater.fetch(&req, NOW).unwrap();
        assert_eq!(report.status, None);
        assert!(report.asset_path.unwrap().is_file());
        assert!(report.extracted_root.is_none());
    }

    #[test]
    fn throttled_run_skips_lookup() {
        let dir = TempDir::new().unwrap();
        let mut h = harness(Tag::new(0, 9, 3));
        *h.store.0.borrow_mut() = Some(ScheduleRecord { time: NOW - 60 });

        let err = h
            .updater
            .fetch(&request(dir.path(), Tag::new(0, 9, 0)), NOW)
            .unwrap_err();
        assert!(matches!(err, UpdError::ScheduleThrottled(d) if d == Duration::from_secs(7140)));
        assert_eq!(h.lookups.get(), 0);
        assert!(matches!(h.updater.phase(), UpdatePhase::Failed(_)));
    }

    #[test]
    fn force_bypasses_the_gate() {
        let dir = TempDir::new().unwrap();
        let mut h = harness(Tag::new(0, 9, 3));
        *h.store.0.borrow_mut() = Some(ScheduleRecord { time: NOW - 60 });
        let mut req = request(dir.path(), Tag::new(0, 9, 3));
        req.force = true;

        h.updater.fetch(&req, NOW).unwrap();
        assert_eq!(h.lookups.get(), 1);
        assert_eq!(*h.store.0.borrow(), Some(ScheduleRecord { time: NOW }));
    }

    #[test]
    fn check_is_recorded_even_when_lookup_fails() {
        let dir = TempDir::new().unwrap();
        let store = MemoryStore::default();
        let mut updater = Updater::new(
            FailingLookup,
            ZipTransfer {
                calls: Rc::new(Cell::new(0)),
            },
            ScheduleGate::new(store.clone(), DELAY),
        );

        let err = updater
            .fetch(&request(dir.path(), Tag::new(0, 9, 0)), NOW)
            .unwrap_err();
        assert!(matches!(err, UpdError::LookupFailed(_)));
        assert_eq!(*store.0.borrow(), Some(ScheduleRecord { time: NOW }));
    }

    #[test]
    fn missing_release_is_a_lookup_failure() {
        let dir = TempDir::new().unwrap();
        let mut updater = Updater::new(
            FakeLookup {
                context: None,
                calls: Rc::new(Cell::new(0)),
            },
            ZipTransfer {
                calls: Rc::new(Cell::new(0)),
            },
            ScheduleGate::new(MemoryStore::default(), DELAY),
        );
        assert!(matches!(
            updater.fetch(&request(dir.path(), Tag::new(0, 9, 0)), NOW),
            Err(UpdError::LookupFailed(_))
        ));
    }

    #[test]
    fn extract_without_download_fails() {
        let dir = TempDir::new().unwrap();
        let mut h = harness(Tag::new(0, 9, 3));
        let mut req = request(dir.path(), Tag::new(0, 9, 0));
        req.download = false;
        assert!(matches!(
            h.updater.fetch(&req, NOW),
            Err(UpdError::ArchiveError(_))
        ));
    }

    #[test]
    fn asset_name_must_be_a_file_name() {
        let dir = TempDir::new().unwrap();
        let mut h = harness(Tag::new(0, 9, 3));
        h.updater.lookup.context = Some(ReleaseContext {
            asset_name: "../evil.zip".into(),
            ..context(Tag::new(0, 9, 3))
        });
        assert!(matches!(
            h.updater.fetch(&request(dir.path(), Tag::new(0, 9, 0)), NOW),
            Err(UpdError::FileSystemError(_))
        ));
        assert_eq!(h.transfers.get(), 0);
    }

    #[test]
    fn temp_dir_rules() {
        let dir = TempDir::new().unwrap();
        for bad in ["", ".", "../outside", "./"] {
            assert!(
                prepare_temp_dir(dir.path(), Path::new(bad)).is_err(),
                "{bad:?} should be rejected"
            );
        }
        #[cfg(unix)]
        assert!(prepare_temp_dir(dir.path(), Path::new("/tmp/x")).is_err());

        let temp = dir.path().join("temp");
        std::fs::create_dir_all(temp.join("old")).unwrap();
        std::fs::write(temp.join("old/file"), "x").unwrap();
        let prepared = prepare_temp_dir(dir.path(), Path::new("temp")).unwrap();
        assert_eq!(prepared, temp);
        assert!(prepared.is_dir());
        assert_eq!(std::fs::read_dir(&prepared).unwrap().count(), 0);
    }

    #[test]
    fn phase_transitions_only_move_forward() {
        let mut tracker = PhaseTracker::default();
        tracker.advance(UpdatePhase::Checking).unwrap();
        tracker.advance(UpdatePhase::Extracting).unwrap();
        assert!(tracker.advance(UpdatePhase::Downloading).is_err());
        tracker.fail(UpdError::ArchiveError("bad".into()));
        assert_eq!(
            tracker.phase(),
            &UpdatePhase::Failed("Archive error: bad".into())
        );
        assert!(tracker.advance(UpdatePhase::Done).is_err());
    }

    fn install(dir: &Path) -> (PathBuf, PathBuf) {
        let target = dir.join("app");
        let working = target.join("temp").join("app");
        std::fs::create_dir_all(&working).unwrap();
        std::fs::write(target.join("old.txt"), "old").unwrap();
        std::fs::write(target.join("settings.ini"), "mine").unwrap();
        std::fs::write(
            target.join("dynamicFiles.json"),
            r#"{"files": ["settings.ini", "dynamicFiles.json"]}"#,
        )
        .unwrap();
        std::fs::write(working.join("new.txt"), "new").unwrap();
        std::fs::write(working.join("updatr"), "agent").unwrap();
        (target, working)
    }

    fn apply_request(target: &Path, working: &Path) -> ApplyRequest {
        ApplyRequest {
            target: target.to_path_buf(),
            pid: 4242,
            caller: Some(target.join("app-bin")),
            caller_args: vec![],
            working_dir: working.to_path_buf(),
            source: PathBuf::from("."),
            manifest: PathBuf::from("dynamicFiles.json"),
            timeout: Duration::from_secs(5),
            strict: false,
        }
    }

    #[test]
    fn apply_waits_syncs_and_relaunches() {
        let dir = TempDir::new().unwrap();
        let (target, working) = install(dir.path());
        let process = FakeProcess::default();
        let mut applier = Applier::new(&process);

        let report = applier.apply(&apply_request(&target, &working)).unwrap();

        assert_eq!(*process.waited.borrow(), vec![4242]);
        assert!(!target.join("old.txt").exists());
        assert_eq!(std::fs::read_to_string(target.join("settings.ini")).unwrap(), "mine");
        assert_eq!(std::fs::read_to_string(target.join("new.txt")).unwrap(), "new");
        assert!(target.join("updatr").is_file());
        assert!(working.join("new.txt").is_file());
        assert_eq!(report.copied, 2);
        let launched = process.launched.borrow();
        assert_eq!(launched.len(), 1);
        assert_eq!(launched[0].0, target.join("app-bin"));
        assert_eq!(launched[0].2, target);
        assert_eq!(launched[0].3, None);
        assert_eq!(applier.phase(), &UpdatePhase::Done);
    }

    #[test]
    fn apply_timeout_leaves_target_untouched() {
        let dir = TempDir::new().unwrap();
        let (target, working) = install(dir.path());
        let process = FakeProcess {
            timeout: true,
            ..Default::default()
        };
        let mut applier = Applier::new(&process);

        let err = applier.apply(&apply_request(&target, &working)).unwrap_err();

        assert!(matches!(err, UpdError::ProcessWaitTimeout { pid: 4242, .. }));
        assert!(target.join("old.txt").exists());
        assert!(!target.join("new.txt").exists());
        assert!(process.launched.borrow().is_empty());
        assert!(matches!(applier.phase(), UpdatePhase::Failed(_)));
    }

    #[test]
    fn apply_without_pid_or_caller() {
        let dir = TempDir::new().unwrap();
        let (target, working) = install(dir.path());
        let process = FakeProcess::default();
        let mut request = apply_request(&target, &working);
        request.pid = 0;
        request.caller = None;

        Applier::new(&process).apply(&request).unwrap();
        assert!(process.waited.borrow().is_empty());
        assert!(process.launched.borrow().is_empty());
        assert!(target.join("new.txt").exists());
    }

    #[test]
    fn apply_rejects_relative_target_and_outside_working_dir() {
        let dir = TempDir::new().unwrap();
        let (target, working) = install(dir.path());
        let process = FakeProcess::default();

        let mut relative = apply_request(&target, &working);
        relative.target = PathBuf::from("app");
        assert!(matches!(
            Applier::new(&process).apply(&relative),
            Err(UpdError::FileSystemError(_))
        ));

        let mut outside = apply_request(&target, &working);
        outside.working_dir = dir.path().to_path_buf();
        assert!(matches!(
            Applier::new(&process).apply(&outside),
            Err(UpdError::FileSystemError(_))
        ));
        assert!(process.waited.borrow().is_empty());
        assert!(target.join("old.txt").exists());
    }

    #[test]
    fn request_apply_launches_agent_from_extracted_root() {
        let dir = TempDir::new().unwrap();
        let root = dir.path().join("temp/app");
        std::fs::create_dir_all(&root).unwrap();
        std::fs::write(root.join("updatr"), "agent").unwrap();
        let process = FakeProcess::default();

        request_apply(
            &&process,
            &root,
            "updatr",
            dir.path(),
            77,
            Some(Path::new("/opt/app/app-bin")),
            Some(&dir.path().join("temp/release.log")),
        )
        .unwrap();

        let launched = process.launched.borrow();
        assert_eq!(launched[0].0, root.join("updatr"));
        assert_eq!(launched[0].2, root);
        assert_eq!(launched[0].3, Some(dir.path().join("temp/release.log")));
        assert_eq!(
            launched[0].1,
            vec![
                "apply".to_string(),
                "--target".to_string(),
                dir.path().display().to_string(),
                "--pid".to_string(),
                "77".to_string(),
                "--caller".to_string(),
                "/opt/app/app-bin".to_string(),
            ]
        );

        assert!(request_apply(&&process, &root, "missing", dir.path(), 77, None, None).is_err());
    }
}
