//! Shared utility functions

use std::future::Future;
use std::time::Duration;
use thiserror::Error;

/// Characters that may not appear in a file name on common filesystems
const UNSAFE_FILENAME_CHARS: &[char] = &['\\', '/', ':', '*', '?', '"', '<', '>', '|'];

/// Maximum length (in characters) of a sanitized file name stem
pub const MAX_FILENAME_LEN: usize = 100;

/// Strip path-unsafe characters and cap the length of a file name stem.
///
/// Falls back to `untitled` when nothing usable remains.
pub fn sanitize_filename(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .filter(|c| !UNSAFE_FILENAME_CHARS.contains(c) && !c.is_control())
        .take(MAX_FILENAME_LEN)
        .collect();

    let trimmed = cleaned.trim();
    if trimmed.is_empty() {
        "untitled".to_string()
    } else {
        trimmed.to_string()
    }
}

/// The caller stopped waiting; the operation keeps running in the background
#[derive(Debug, Error)]
pub enum Abandoned {
    #[error("operation abandoned after {0:?}")]
    TimedOut(Duration),
    #[error("operation task failed: {0}")]
    Join(String),
}

/// Run `fut` on its own task and wait at most `deadline` for it.
///
/// On timeout the task is left to finish or fail on its own; it is never
/// interrupted mid-request, so cleanup inside the operation still runs.
pub async fn run_detached<F, T>(deadline: Duration, fut: F) -> Result<T, Abandoned>
where
    F: Future<Output = T> + Send + 'static,
    T: Send + 'static,
{
    let handle = tokio::spawn(fut);
    match tokio::time::timeout(deadline, handle).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) => Err(Abandoned::Join(e.to_string())),
        Err(_) => {
            tracing::warn!("Abandoning operation after {:?}", deadline);
            Err(Abandoned::TimedOut(deadline))
        }
    }
}
