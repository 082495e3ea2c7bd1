use crate::{
    error::{UpdError, UpdResult},
    github::GithubReleases,
    process::SystemProcess,
    schedule::{self, FileScheduleStore, ScheduleGate},
    settings::Settings,
    tag::Tag,
    update::{Applier, ApplyRequest, FetchRequest, Updater, request_apply},
};
use std::path::PathBuf;
use std::time::Duration;

/// Check for a newer release and stage it next to the installation
#[derive(clap::Args, Debug, Clone)]
pub struct FetchCommand {
    /// Tag of the running installation, e.g. v1.2.3
    #[arg(long)]
    pub current: Tag,
    /// Owner of the release repository
    #[arg(long)]
    pub owner: String,
    /// Name of the release repository
    #[arg(long)]
    pub repo: String,
    /// Download directory, relative to the working directory
    #[arg(long)]
    pub temp: Option<PathBuf>,
    /// Compare the latest tag with --current and stop unless it is newer
    #[arg(long, action = clap::ArgAction::SetTrue)]
    pub verify: bool,
    /// Download the release asset
    #[arg(long, action = clap::ArgAction::SetTrue)]
    pub download: bool,
    /// Extract the downloaded asset
    #[arg(long, action = clap::ArgAction::SetTrue, requires = "download")]
    pub extract: bool,
    /// Accept a prerelease as the latest release
    #[arg(long, action = clap::ArgAction::SetTrue)]
    pub prerelease: bool,
    /// Ignore the schedule gate
    #[arg(long, action = clap::ArgAction::SetTrue)]
    pub force: bool,
    /// Minimum hours between two remote checks
    #[arg(long)]
    pub delay_hours: Option<u64>,
    /// Start the apply agent shipped with the extracted release
    #[arg(long, action = clap::ArgAction::SetTrue, requires_all = ["extract", "pid"])]
    pub handoff: bool,
    /// Process the apply agent waits for, usually the application running fetch
    #[arg(long, requires = "handoff")]
    pub pid: Option<u32>,
    /// Executable to relaunch once the update is applied
    #[arg(long, requires = "handoff")]
    pub caller: Option<PathBuf>,
}

/// Replace the installation files with an extracted release
#[derive(clap::Args, Debug, Clone)]
pub struct ApplyCommand {
    /// Absolute path of the installation to update
    #[arg(long)]
    pub target: PathBuf,
    /// Process to wait for before touching any file, 0 to skip
    #[arg(long)]
    pub pid: u32,
    /// Executable to relaunch after the update
    #[arg(long)]
    pub caller: Option<PathBuf>,
    /// Argument passed to the relaunched executable, repeatable
    #[arg(long = "caller-arg", requires = "caller")]
    pub caller_args: Vec<String>,
    /// Extracted release, relative to the working directory
    #[arg(long, default_value = ".")]
    pub source: PathBuf,
    /// Dynamic files manifest, relative to the target
    #[arg(long)]
    pub manifest: Option<PathBuf>,
    /// How long to wait for --pid to exit
    #[arg(long)]
    pub timeout_ms: Option<u64>,
    /// Abort on the first file error
    #[arg(long, action = clap::ArgAction::SetTrue)]
    pub strict: bool,
}

impl FetchCommand {
    pub fn run(&self, settings: &Settings) -> UpdResult<()> {
        let working_dir = std::env::current_dir()?;
        let min_delay = self
            .delay_hours
            .map(schedule::hours)
            .unwrap_or_else(|| settings.schedule.min_delay());
        let store = FileScheduleStore::new(&settings.schedule.file);
        log::debug!("Schedule record at {}", store.path().display());
        let gate = ScheduleGate::new(store, min_delay);
        let client = GithubReleases::new(&settings.github, settings.system.clone());
        let mut updater = Updater::new(client.clone(), client, gate);

        let request = FetchRequest {
            owner: self.owner.clone(),
            repo: self.repo.clone(),
            current: self.current,
            temp_dir: self
                .temp
                .clone()
                .unwrap_or_else(|| PathBuf::from(&settings.fetch.temp_dir)),
            working_dir: working_dir.clone(),
            verify: self.verify,
            download: self.download,
            extract: self.extract,
            prerelease: self.prerelease,
            force: self.force,
        };
        let report = updater.fetch(&request, chrono::Utc::now().timestamp())?;

        println!("tag: {}", report.context.latest_tag);
        if let Some(status) = report.status {
            println!("status: {}", status);
        }
        if let Some(asset) = &report.asset_path {
            println!("asset: {}", asset.display());
        }
        if let Some(root) = &report.extracted_root {
            println!("root: {}", root.display());
        }

        if self.handoff {
            let pid = self
                .pid
                .ok_or_else(|| UpdError::Error("--handoff needs the --pid to wait for".into()))?;
            match &report.extracted_root {
                Some(root) => {
                    // next to the asset, inside the staging directory but outside the release
                    let log_file = report.asset_path.as_ref().map(|p| p.with_extension("log"));
                    request_apply(
                        &SystemProcess,
                        root,
                        &settings.fetch.updater_executable,
                        &working_dir,
                        pid,
                        self.caller.as_deref(),
                        log_file.as_deref(),
                    )?;
                    println!("handoff: started");
                }
                None => log::info!("Nothing staged, no handoff"),
            }
        }
        Ok(())
    }
}

impl ApplyCommand {
    pub fn run(&self, settings: &Settings) -> UpdResult<()> {
        let request = ApplyRequest {
            target: self.target.clone(),
            pid: self.pid,
            caller: self.caller.clone(),
            caller_args: self.caller_args.clone(),
            working_dir: std::env::current_dir()?,
            source: self.source.clone(),
            manifest: self
                .manifest
                .clone()
                .unwrap_or_else(|| PathBuf::from(&settings.apply.manifest)),
            timeout: Duration::from_millis(
                self.timeout_ms.unwrap_or(settings.apply.wait_timeout_ms),
            ),
            strict: self.strict || settings.apply.strict,
        };

        let report = Applier::new(SystemProcess).apply(&request)?;
        for failure in &report.failures {
            log::warn!("Not updated: {} ({})", failure.path.display(), failure.reason);
        }
        println!("{}", report);
        Ok(())
    }
}
