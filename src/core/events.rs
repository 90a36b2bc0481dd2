use crate::core::model::JobId;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone)]
pub enum QueueEvent {
    Queued { job_id: JobId, uri: String },
    AttemptStarted { job_id: JobId, attempt: u32, max_attempts: u32 },
    Progress {
        job_id: JobId,
        downloaded: u64,
        total: Option<u64>,
        speed_bps: u64,
        eta: Option<Duration>,
    },
    ChunkDone { job_id: JobId, completed: u64, total: u64 },
    AttemptFailed { job_id: JobId, attempt: u32, message: String },
    Finished { job_id: JobId, path: PathBuf },
    Failed { job_id: JobId, message: String },
}
