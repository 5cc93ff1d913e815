use crate::error::DatasetError;

/// Identifier of an externally managed task.
pub type TaskId = String;

/// Seam to the external task/progress reporter. The engine reports once per
/// produced signal output element and observes cancellation only at that
/// boundary.
pub trait ProgressReporter: Send + Sync {
    fn report(&self, task_id: &str, completed: usize, estimated_total: Option<usize>);

    fn is_cancelled(&self, _task_id: &str) -> bool {
        false
    }
}

/// Wraps a signal's output, reporting progress per element. Cancellation
/// surfaces as an error between elements; the underlying iterator is not
/// advanced further.
pub(crate) struct Progress<'a, I> {
    inner: I,
    reporter: Option<&'a dyn ProgressReporter>,
    task_id: Option<&'a str>,
    estimated_total: Option<usize>,
    completed: usize,
    stopped: bool,
}

pub(crate) fn progress<'a, I>(
    inner: I,
    reporter: Option<&'a dyn ProgressReporter>,
    task_id: Option<&'a str>,
    estimated_total: Option<usize>,
) -> Progress<'a, I> {
    Progress {
        inner,
        reporter,
        task_id,
        estimated_total,
        completed: 0,
        stopped: false,
    }
}

impl<T, I: Iterator<Item = Result<T, DatasetError>>> Iterator for Progress<'_, I> {
    type Item = Result<T, DatasetError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.stopped {
            return None;
        }
        if let (Some(reporter), Some(task_id)) = (self.reporter, self.task_id) {
            if reporter.is_cancelled(task_id) {
                self.stopped = true;
                return Some(Err(DatasetError::internal(format!(
                    "task \"{}\" was cancelled",
                    task_id
                ))));
            }
        }
        let item = self.inner.next()?;
        self.completed += 1;
        if let (Some(reporter), Some(task_id)) = (self.reporter, self.task_id) {
            reporter.report(task_id, self.completed, self.estimated_total);
        }
        Some(item)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingReporter {
        reports: AtomicUsize,
        cancel_after: usize,
    }

    impl ProgressReporter for CountingReporter {
        fn report(&self, _task_id: &str, _completed: usize, _total: Option<usize>) {
            self.reports.fetch_add(1, Ordering::SeqCst);
        }

        fn is_cancelled(&self, _task_id: &str) -> bool {
            self.cancel_after != 0 && self.reports.load(Ordering::SeqCst) >= self.cancel_after
        }
    }

    #[test]
    fn reports_once_per_element() {
        let reporter = CountingReporter {
            reports: AtomicUsize::new(0),
            cancel_after: 0,
        };
        let items = (0..4).map(Ok::<_, DatasetError>);
        let collected: Result<Vec<_>, _> =
            progress(items, Some(&reporter), Some("t1"), Some(4)).collect();
        assert_eq!(collected.unwrap().len(), 4);
        assert_eq!(reporter.reports.load(Ordering::SeqCst), 4);
    }

    #[test]
    fn cancellation_stops_between_elements() {
        let reporter = CountingReporter {
            reports: AtomicUsize::new(0),
            cancel_after: 2,
        };
        let items = (0..10).map(Ok::<_, DatasetError>);
        let collected: Vec<_> = progress(items, Some(&reporter), Some("t1"), None).collect();
        assert_eq!(collected.len(), 3);
        assert!(collected[2].is_err());
    }
}
