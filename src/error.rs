use std::time::Duration;
use thiserror::Error;

pub type UpdResult<T> = Result<T, UpdError>;

#[derive(Error, Debug)]
pub enum UpdError {
    #[error("Invalid tag '{0}', expected [v]<major>.<minor>.<patch>")]
    Parse(String),
    #[error("Update check throttled, next check allowed in {}s", .0.as_secs())]
    ScheduleThrottled(Duration),
    #[error("Release lookup failed: {0}")]
    LookupFailed(String),
    #[error("Asset transfer failed: {0}")]
    TransferFailed(String),
    #[error("Archive error: {0}")]
    ArchiveError(String),
    #[error("{0}")]
    FileSystemError(String),
    #[error("Process {pid} did not exit within {}ms", .timeout.as_millis())]
    ProcessWaitTimeout { pid: u32, timeout: Duration },
    #[error("{0}")]
    Error(String),
    #[error(transparent)]
    IoError(#[from] std::io::Error),
    #[error(transparent)]
    SerdeJsonError(#[from] serde_json::Error),
    #[error(transparent)]
    ReqwestError(#[from] reqwest::Error),
    #[error(transparent)]
    ZipError(#[from] zip::result::ZipError),
}

impl From<String> for UpdError {
    fn from(error: String) -> Self {
        Self::Error(error)
    }
}
impl From<&str> for UpdError {
    fn from(error: &str) -> Self {
        Self::Error(error.to_string())
    }
}
