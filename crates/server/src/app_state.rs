use std::{path::PathBuf, time::Duration};

use crate::api::JobStore;

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) jobs: JobStore,
    pub(crate) png_path: Option<PathBuf>,
    pub(crate) step_delay: Duration,
}
