use anyhow::Result;
use tokio_util::sync::CancellationToken;

use super::config::Config;
use super::services::build_http_client;
use crate::error::ModError;
use crate::module::Version;
use crate::runtime::Runtime;
use crate::self_update::{BUILD_TARGET, UpdateOutcome, UpdateRequest, self_update};

/// Local failures while preparing an update report as the update failing.
fn as_update_failure(e: anyhow::Error) -> ModError {
    ModError::SelfUpdate {
        message: format!("{:#}", e),
    }
}

/// Update the running `modman` executable. No workspace is needed or touched.
#[tracing::instrument(skip(runtime, config, cancel))]
pub async fn update<R: Runtime>(
    runtime: R,
    config: &Config,
    cancel: CancellationToken,
) -> Result<UpdateOutcome> {
    let current: Version = env!("CARGO_PKG_VERSION")
        .parse()
        .map_err(|e: ModError| as_update_failure(e.into()))?;
    let executable = runtime.current_exe().map_err(as_update_failure)?;
    let http = build_http_client().map_err(as_update_failure)?;
    let channel_url = config.update_url();

    let request = UpdateRequest {
        channel_url: &channel_url,
        current,
        target: BUILD_TARGET,
        executable: &executable,
    };
    let outcome = self_update(&runtime, &http, &request, &cancel).await?;
    if let UpdateOutcome::UpToDate { current } = &outcome {
        println!("modman {} is up to date", current);
    }
    Ok(outcome)
}
