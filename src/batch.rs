//! Batch items and the bounded worker pool used by the blocking handler.

use std::any::Any;
use std::collections::BTreeMap;
use std::panic::{self, AssertUnwindSafe};

use serde::Deserialize;
use serde_json::Value;

use crate::{HttpError, Method, Payload, RequestDescriptor, Result};

/// Worker count used by `BlockingHttpHandler::execute_batch`.
pub const DEFAULT_MAX_CONCURRENCY: usize = 5;

/// Index-aligned outcomes of a batch; one slot per input item.
pub type BatchResult = Vec<Result<Payload>>;

/// One loosely-typed batch entry, as it may arrive from JSON or config.
///
/// Missing or invalid fields only fail this item; see
/// [`BatchItem::into_descriptor`].
#[derive(Clone, Debug, Default, Deserialize)]
pub struct BatchItem {
    #[serde(default)]
    pub method: Option<String>,
    #[serde(default, alias = "endpoint")]
    pub path: Option<String>,
    #[serde(default, alias = "json")]
    pub body: Option<Value>,
    #[serde(default, alias = "params")]
    pub query: BTreeMap<String, String>,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    /// Overrides the batch-wide decoding default for this item.
    #[serde(default)]
    pub decode_json: Option<bool>,
}

impl BatchItem {
    pub fn new(method: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            method: Some(method.into()),
            path: Some(path.into()),
            ..Self::default()
        }
    }

    /// Validates the item into a descriptor.
    ///
    /// `default_decode` applies when the item leaves `decode_json` unset.
    pub fn into_descriptor(self, default_decode: bool) -> Result<RequestDescriptor> {
        let (Some(method), Some(path)) = (self.method, self.path) else {
            return Err(HttpError::Validation(
                "'method' and 'path' are required".to_owned(),
            ));
        };
        let method: Method = method.parse()?;

        let mut descriptor = RequestDescriptor::new(method, path)
            .query_pairs(self.query)
            .decode_json(self.decode_json.unwrap_or(default_decode));
        for (name, value) in self.headers {
            descriptor = descriptor.header(name, value);
        }
        if let Some(body) = self.body {
            descriptor = descriptor.body(body);
        }
        descriptor.validate()?;
        Ok(descriptor)
    }
}

/// Input accepted by the batch methods: a typed descriptor or a loose item.
#[derive(Clone, Debug)]
pub enum BatchRequest {
    /// Built with the request builder; sent as is, with its own options.
    Descriptor(RequestDescriptor),
    /// Validated when the batch runs.
    Item(BatchItem),
}

impl BatchRequest {
    /// Resolves the request, applying `default_decode` to loose items only.
    pub fn into_descriptor(self, default_decode: bool) -> Result<RequestDescriptor> {
        match self {
            Self::Descriptor(descriptor) => {
                descriptor.validate()?;
                Ok(descriptor)
            }
            Self::Item(item) => item.into_descriptor(default_decode),
        }
    }
}

impl From<RequestDescriptor> for BatchRequest {
    fn from(descriptor: RequestDescriptor) -> Self {
        Self::Descriptor(descriptor)
    }
}

impl From<BatchItem> for BatchRequest {
    fn from(item: BatchItem) -> Self {
        Self::Item(item)
    }
}

pub(crate) fn check_concurrency(max_concurrency: usize) -> Result<()> {
    if max_concurrency == 0 {
        return Err(HttpError::Config(
            "max_concurrency must be at least 1".to_owned(),
        ));
    }
    Ok(())
}

pub(crate) fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        format!("request panicked: {message}")
    } else if let Some(message) = panic.downcast_ref::<String>() {
        format!("request panicked: {message}")
    } else {
        "request panicked".to_owned()
    }
}

/// Runs `work` for every item on at most `max_workers` OS threads.
///
/// Workers pull `(index, item)` jobs from a shared queue and report
/// `(index, outcome)` back; outcomes are placed by index, so the result is
/// aligned with `items` whatever the completion order. A panicking item
/// yields `HttpError::Unexpected` in its own slot.
pub(crate) fn run_worker_pool<T, F>(items: Vec<T>, max_workers: usize, work: F) -> BatchResult
where
    T: Send,
    F: Fn(usize, T) -> Result<Payload> + Sync,
{
    let total = items.len();
    let (job_tx, job_rx) = crossbeam_channel::unbounded::<(usize, T)>();
    for job in items.into_iter().enumerate() {
        if job_tx.send(job).is_err() {
            break;
        }
    }
    drop(job_tx);

    let (done_tx, done_rx) = crossbeam_channel::unbounded::<(usize, Result<Payload>)>();
    let work = &work;
    std::thread::scope(|scope| {
        for _ in 0..max_workers.min(total) {
            let job_rx = job_rx.clone();
            let done_tx = done_tx.clone();
            scope.spawn(move || {
                for (index, item) in job_rx.iter() {
                    let outcome = panic::catch_unwind(AssertUnwindSafe(|| work(index, item)))
                        .unwrap_or_else(|panic| Err(HttpError::Unexpected(panic_message(&*panic))));
                    if done_tx.send((index, outcome)).is_err() {
                        break;
                    }
                }
            });
        }
    });
    drop(done_tx);

    let mut slots: Vec<Option<Result<Payload>>> = (0..total).map(|_| None).collect();
    for (index, outcome) in done_rx.iter() {
        slots[index] = Some(outcome);
    }
    slots
        .into_iter()
        .enumerate()
        .map(|(index, slot)| {
            slot.unwrap_or_else(|| {
                Err(HttpError::Unexpected(format!(
                    "batch item {index} produced no result"
                )))
            })
        })
        .collect()
}
