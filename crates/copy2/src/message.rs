use copy2_core::auto_update::UpdateProgress;
use copy2_core::{HelperScript, ReleaseInfo};

use crate::error::AppError;

/// Results handed from the background worker to the interactive thread.
#[derive(Debug)]
pub enum Message {
    UpdateChecked {
        result: Box<Result<ReleaseInfo, AppError>>,
        prompt: bool,
    },
    UpdateProgress(UpdateProgress),
    UpdatePrepared(Box<Result<HelperScript, AppError>>),
    TaskFailed(AppError),
}
