use crate::error::{UpdError, UpdResult};
use std::fs::File;
use std::path::Path;
use std::process::{Command, Stdio};
use std::time::Duration;

/// OS process primitives the update handoff relies on.
pub trait ProcessControl {
    /// Blocks until `pid` is gone or `timeout` elapses. An unknown pid counts
    /// as already exited.
    fn wait_for_exit(&self, pid: u32, timeout: Duration) -> UpdResult<()>;

    /// Starts `executable` detached from the current process. Its stdout and
    /// stderr go to `output` when given, otherwise they are discarded.
    fn launch(
        &self,
        executable: &Path,
        args: &[String],
        working_dir: &Path,
        output: Option<&Path>,
    ) -> UpdResult<()>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemProcess;

impl ProcessControl for SystemProcess {
    fn wait_for_exit(&self, pid: u32, timeout: Duration) -> UpdResult<()> {
        if pid == 0 {
            return Ok(());
        }
        log::info!("Waiting for process {} to finish", pid);
        if platform::wait_for_exit(pid, timeout) {
            log::info!("Process {} has exited", pid);
            Ok(())
        } else {
            Err(UpdError::ProcessWaitTimeout { pid, timeout })
        }
    }

    fn launch(
        &self,
        executable: &Path,
        args: &[String],
        working_dir: &Path,
        output: Option<&Path>,
    ) -> UpdResult<()> {
        let mut command = Command::new(executable);
        command
            .args(args)
            .current_dir(working_dir)
            .stdin(Stdio::null());
        match output {
            Some(path) => {
                let stdout = File::create(path).map_err(|err| {
                    UpdError::FileSystemError(format!(
                        "Failed to create log file {}: {}",
                        path.display(),
                        err
                    ))
                })?;
                let stderr = stdout.try_clone()?;
                command.stdout(stdout).stderr(stderr);
            }
            None => {
                command.stdout(Stdio::null()).stderr(Stdio::null());
            }
        }
        platform::detach(&mut command);
        let child = command.spawn().map_err(|err| {
            UpdError::Error(format!(
                "Failed to launch {}: {}",
                executable.display(),
                err
            ))
        })?;
        log::info!(
            "Launched {} {} (pid {}) in {}",
            executable.display(),
            args.join(" "),
            child.id(),
            working_dir.display()
        );
        Ok(())
    }
}

#[cfg(unix)]
mod platform {
    use std::os::unix::process::CommandExt;
    use std::process::Command;
    use std::time::{Duration, Instant};

    const POLL_INTERVAL: Duration = Duration::from_millis(50);

    fn is_alive(pid: u32) -> bool {
        let Ok(pid) = libc::pid_t::try_from(pid) else {
            return false;
        };
        if unsafe { libc::kill(pid, 0) } == 0 {
            return true;
        }
        // EPERM: the process exists but belongs to someone else
        std::io::Error::last_os_error().raw_os_error() != Some(libc::ESRCH)
    }

    pub fn wait_for_exit(pid: u32, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            if !is_alive(pid) {
                return true;
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            std::thread::sleep(POLL_INTERVAL.min(deadline - now));
        }
    }

    pub fn detach(command: &mut Command) {
        command.process_group(0);
    }
}

#[cfg(windows)]
mod platform {
    use std::os::windows::process::CommandExt;
    use std::process::Command;
    use std::time::Duration;
    use windows_sys::Win32::{
        Foundation::{CloseHandle, HANDLE, WAIT_OBJECT_0},
        System::Threading::{
            CREATE_NEW_PROCESS_GROUP, DETACHED_PROCESS, OpenProcess, PROCESS_SYNCHRONIZE,
            WaitForSingleObject,
        },
    };

    struct HandleGuard(HANDLE);
    impl Drop for HandleGuard {
        fn drop(&mut self) {
            unsafe { CloseHandle(self.0) };
        }
    }

    pub fn wait_for_exit(pid: u32, timeout: Duration) -> bool {
        let handle = unsafe { OpenProcess(PROCESS_SYNCHRONIZE, 0, pid) };
        if handle.is_null() {
            log::info!("Failed to open process {}, assuming it already exited", pid);
            return true;
        }
        let _guard = HandleGuard(handle);
        let millis = u32::try_from(timeout.as_millis()).unwrap_or(u32::MAX - 1);
        unsafe { WaitForSingleObject(handle, millis) == WAIT_OBJECT_0 }
    }

    pub fn detach(command: &mut Command) {
        command.creation_flags(DETACHED_PROCESS | CREATE_NEW_PROCESS_GROUP);
    }
}
