//! Execution configuration passed to every kernel.

use std::sync::Arc;

use crate::{Result, StridedError};

/// Default minimum work size (elements) before a kernel goes parallel.
///
/// 256×256 elements.
pub const DEFAULT_PARALLEL_THRESHOLD: usize = 65_536;

const THREADS_VAR: &str = "STRIDED_DENSE_THREADS";
const THRESHOLD_VAR: &str = "STRIDED_DENSE_THRESHOLD";

/// Thread count, parallel threshold and worker pool for kernel calls.
///
/// Built once by the application and passed by reference into every
/// elementwise, reduction and multiply call. Cloning is cheap: a dedicated
/// pool is shared through an `Arc`.
#[derive(Clone)]
pub struct ExecutionContext {
    threads: usize,
    threshold: usize,
    pool: Option<Arc<rayon::ThreadPool>>,
}

impl Default for ExecutionContext {
    /// Rayon's global pool, sized to `rayon::current_num_threads()`.
    fn default() -> Self {
        Self {
            threads: rayon::current_num_threads(),
            threshold: DEFAULT_PARALLEL_THRESHOLD,
            pool: None,
        }
    }
}

impl std::fmt::Debug for ExecutionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionContext")
            .field("threads", &self.threads)
            .field("threshold", &self.threshold)
            .field("dedicated_pool", &self.pool.is_some())
            .finish()
    }
}

impl ExecutionContext {
    /// A context backed by a dedicated pool of `threads` workers.
    ///
    /// `threads <= 1` yields a sequential context without building a pool.
    pub fn new(threads: usize) -> Result<Self> {
        if threads <= 1 {
            return Ok(Self::sequential());
        }
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .thread_name(|i| format!("strided-dense-{i}"))
            .build()?;
        Ok(Self {
            threads,
            threshold: DEFAULT_PARALLEL_THRESHOLD,
            pool: Some(Arc::new(pool)),
        })
    }

    /// A context that always runs on the calling thread.
    pub fn sequential() -> Self {
        Self {
            threads: 1,
            threshold: DEFAULT_PARALLEL_THRESHOLD,
            pool: None,
        }
    }

    /// Set the minimum work size for parallel dispatch.
    ///
    /// `0` forces the parallel path whenever more than one thread is
    /// configured; `usize::MAX` forces the sequential path.
    pub fn with_threshold(mut self, threshold: usize) -> Self {
        self.threshold = threshold;
        self
    }

    /// Build a context from `STRIDED_DENSE_THREADS` and `STRIDED_DENSE_THRESHOLD`.
    ///
    /// Unset variables fall back to the [`Default`] values.
    pub fn from_env() -> Result<Self> {
        let threads = read_var(THREADS_VAR)?;
        let threshold = read_var(THRESHOLD_VAR)?;
        let ctx = match threads {
            Some(n) => Self::new(n)?,
            None => Self::default(),
        };
        Ok(match threshold {
            Some(t) => ctx.with_threshold(t),
            None => ctx,
        })
    }

    #[inline]
    pub fn threads(&self) -> usize {
        self.threads
    }

    #[inline]
    pub fn threshold(&self) -> usize {
        self.threshold
    }

    /// Run `op` inside this context's pool.
    pub(crate) fn install<R, F>(&self, op: F) -> R
    where
        F: FnOnce() -> R + Send,
        R: Send,
    {
        match &self.pool {
            Some(pool) => pool.install(op),
            None => op(),
        }
    }
}

fn read_var(key: &'static str) -> Result<Option<usize>> {
    match std::env::var(key) {
        Ok(value) => value
            .trim()
            .parse::<usize>()
            .map(Some)
            .map_err(|_| StridedError::InvalidConfig { key, value }),
        Err(std::env::VarError::NotPresent) => Ok(None),
        Err(std::env::VarError::NotUnicode(raw)) => Err(StridedError::InvalidConfig {
            key,
            value: raw.to_string_lossy().into_owned(),
        }),
    }
}
