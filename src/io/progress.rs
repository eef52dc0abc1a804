use std::sync::{Mutex, OnceLock};

#[derive(Debug, Clone, PartialEq)]
pub enum BatchProgress {
    /// Named batch phase: "load_model", "process", "teardown".
    Stage(&'static str),
    File {
        index: usize,
        total: usize,
        name: String,
    },
    Reformat {
        name: String,
    },
    Outcome {
        index: usize,
        success: bool,
    },
    Finished {
        succeeded: usize,
        failed: usize,
    },
}

type ProgressCallback = Box<dyn Fn(BatchProgress) + Send + 'static>;

static BATCH_PROGRESS_CB: OnceLock<Mutex<Option<ProgressCallback>>> = OnceLock::new();

pub fn set_batch_progress_callback(cb: impl Fn(BatchProgress) + Send + 'static) {
    let slot = BATCH_PROGRESS_CB.get_or_init(|| Mutex::new(None));
    if let Ok(mut g) = slot.lock() {
        *g = Some(Box::new(cb));
    }
}

pub fn clear_batch_progress_callback() {
    if let Some(m) = BATCH_PROGRESS_CB.get() {
        if let Ok(mut g) = m.lock() {
            *g = None;
        }
    }
}

pub fn emit_batch_progress(progress: BatchProgress) {
    if let Some(m) = BATCH_PROGRESS_CB.get() {
        if let Ok(g) = m.lock() {
            if let Some(cb) = &*g {
                cb(progress);
            }
        }
    }
}
