//! Per-resource readers exposing a uniform range-query page contract.
//!
//! Each backend is synchronous; handlers drive a page extraction inside
//! `tokio::task::spawn_blocking`. A page function opens its file handles,
//! drains up to `budget` records, and returns them together with the
//! resumption state the continuation token will carry. Handles are released
//! when the function returns, on every exit path.

pub mod reads;
pub mod references;
pub mod variants;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use crate::{Error, Result};

/// One page of records plus the state needed to resume after the last one.
#[derive(Debug)]
pub struct Page<T> {
    pub records: Vec<T>,
    pub resume: Option<IntervalResume>,
}

/// Resumption point inside an interval scan: the 0-based start of the last
/// emitted record and how many records at that start have been emitted so
/// far, across pages. Replays skip exactly that prefix, so iteration order
/// and completeness hold for any page size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IntervalResume {
    pub start: u64,
    pub skip: u32,
}

/// Per-request wall-clock deadline, checked at record boundaries.
#[derive(Debug, Clone, Copy)]
pub struct Deadline(Option<Instant>);

impl Deadline {
    pub fn none() -> Self {
        Deadline(None)
    }

    pub fn after(timeout: Duration) -> Self {
        Deadline(Some(Instant::now() + timeout))
    }

    pub fn expired(&self) -> bool {
        match self.0 {
            Some(at) => Instant::now() >= at,
            None => false,
        }
    }
}

/// Cooperative cancellation flag, checked between records.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

pub(crate) fn check_interrupts(deadline: Deadline, cancel: &CancelFlag) -> Result<()> {
    if cancel.is_cancelled() {
        return Err(Error::Cancelled);
    }
    if deadline.expired() {
        return Err(Error::Timeout);
    }
    Ok(())
}

/// Collects records into a page, applying resume skipping on entry and
/// computing the outgoing resume state when the budget is exhausted.
pub(crate) struct PageCollector<T> {
    budget: usize,
    resume: Option<IntervalResume>,
    skipped_at_resume: u32,
    cut: Option<(u64, u32)>,
    records: Vec<T>,
    more: bool,
}

impl<T> PageCollector<T> {
    pub(crate) fn new(budget: usize, resume: Option<IntervalResume>) -> Self {
        Self {
            budget,
            resume,
            skipped_at_resume: 0,
            cut: None,
            records: Vec::with_capacity(budget.min(1024)),
            more: false,
        }
    }

    /// Offer the next record in iteration order. The builder runs only when
    /// the record is actually kept. Returns `false` once the page is full,
    /// at which point the caller stops iterating.
    pub(crate) fn offer<F>(&mut self, start: u64, build: F) -> Result<bool>
    where
        F: FnOnce() -> Result<T>,
    {
        if let Some(resume) = self.resume {
            if start < resume.start {
                return Ok(true);
            }
            if start == resume.start && self.skipped_at_resume < resume.skip {
                self.skipped_at_resume += 1;
                return Ok(true);
            }
        }

        if self.records.len() >= self.budget {
            self.more = true;
            return Ok(false);
        }

        self.records.push(build()?);
        self.cut = Some(match self.cut {
            Some((cut_start, emitted)) if cut_start == start => (start, emitted + 1),
            _ => match self.resume {
                // Still on the resume start: earlier pages already emitted
                // `skip` records here.
                Some(resume) if resume.start == start => (start, resume.skip + 1),
                _ => (start, 1),
            },
        });
        Ok(true)
    }

    pub(crate) fn finish(self) -> Page<T> {
        let resume = if self.more {
            self.cut.map(|(start, skip)| IntervalResume { start, skip })
        } else {
            None
        };
        Page {
            records: self.records,
            resume,
        }
    }
}

/// Wire coordinates are 0-based half-open; noodles positions are 1-based
/// inclusive. `start` converts to the first 1-based position at or after it.
pub(crate) fn to_one_based(
    start: u64,
    end: u64,
) -> Result<(noodles::core::Position, noodles::core::Position)> {
    use noodles::core::Position;

    if start >= end {
        return Err(Error::BadRequest(format!(
            "empty interval [{}, {})",
            start, end
        )));
    }
    let one_start = Position::try_from(start as usize + 1)
        .map_err(|e| Error::BadRequest(format!("invalid start position: {}", e)))?;
    let one_end = Position::try_from(end as usize)
        .map_err(|e| Error::BadRequest(format!("invalid end position: {}", e)))?;
    Ok((one_start, one_end))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn drain(
        starts: &[u64],
        budget: usize,
        resume: Option<IntervalResume>,
    ) -> Page<u64> {
        let mut collector = PageCollector::new(budget, resume);
        for &start in starts {
            if !collector.offer(start, || Ok(start)).unwrap() {
                break;
            }
        }
        collector.finish()
    }

    #[test]
    fn test_single_page_no_resume() {
        let page = drain(&[1, 2, 3], 10, None);
        assert_eq!(page.records, vec![1, 2, 3]);
        assert!(page.resume.is_none());
    }

    #[test]
    fn test_budget_cut_issues_resume() {
        let page = drain(&[1, 2, 3], 2, None);
        assert_eq!(page.records, vec![1, 2]);
        assert_eq!(page.resume, Some(IntervalResume { start: 2, skip: 1 }));
    }

    #[test]
    fn test_resume_skips_emitted_prefix() {
        let page = drain(&[1, 2, 3], 2, Some(IntervalResume { start: 2, skip: 1 }));
        assert_eq!(page.records, vec![3]);
        assert!(page.resume.is_none());
    }

    #[test]
    fn test_ties_at_same_start() {
        // Four records at start 5; page size 2 twice must yield all four.
        let starts = [5, 5, 5, 5];
        let first = drain(&starts, 2, None);
        assert_eq!(first.records.len(), 2);
        assert_eq!(first.resume, Some(IntervalResume { start: 5, skip: 2 }));

        let second = drain(&starts, 2, first.resume);
        assert_eq!(second.records.len(), 2);
        assert!(second.resume.is_none());
    }

    #[test]
    fn test_pagination_completeness_any_page_size() {
        let starts = [1, 4, 4, 4, 7, 9, 9, 12];
        for page_size in 1..=starts.len() + 1 {
            let mut collected = Vec::new();
            let mut resume = None;
            loop {
                let page = drain(&starts, page_size, resume);
                collected.extend(page.records);
                match page.resume {
                    Some(r) => resume = Some(r),
                    None => break,
                }
            }
            assert_eq!(collected, starts.to_vec(), "page size {}", page_size);
        }
    }

    #[test]
    fn test_deadline() {
        assert!(!Deadline::none().expired());
        assert!(Deadline::after(Duration::from_secs(0)).expired());
        assert!(!Deadline::after(Duration::from_secs(3600)).expired());
    }

    #[test]
    fn test_cancel_flag() {
        let flag = CancelFlag::new();
        assert!(check_interrupts(Deadline::none(), &flag).is_ok());
        flag.cancel();
        assert!(matches!(
            check_interrupts(Deadline::none(), &flag),
            Err(Error::Cancelled)
        ));
    }

    #[test]
    fn test_to_one_based() {
        let (start, end) = to_one_based(0, 10).unwrap();
        assert_eq!(usize::from(start), 1);
        assert_eq!(usize::from(end), 10);
        assert!(to_one_based(10, 10).is_err());
    }
}
