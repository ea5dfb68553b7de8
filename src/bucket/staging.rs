//! Write-buffering overlay over another bucket
//!
//! A [`StagingBucket`] wraps exactly one bucket for the lifetime of a
//! request. Writes land in a staged diff and a merged view of the touched
//! fields; the wrapped bucket only changes on [`StagingBucket::commit`].

use crate::bucket::{merge_field, Bucket, MergeOptions};
use crate::core::types::{BucketData, BucketUpdate, Cell, Value};
use crate::delta::diff::diff_field;
use std::fmt;

/// Change notification raised by a [`StagingBucket`]
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum StagingEvent<'a> {
    /// A write is about to be staged
    PreUpdate(&'a BucketUpdate),
    /// A write has been staged
    Update(&'a BucketUpdate),
    /// The staged diff was applied to the wrapped bucket
    Commit(&'a BucketUpdate),
    /// Staged data was discarded
    Revert,
    /// Raised after [`StagingEvent::Revert`] once state is reset
    PostRevert,
}

impl StagingEvent<'_> {
    /// Short name of the event
    pub fn name(&self) -> &'static str {
        match self {
            StagingEvent::PreUpdate(_) => "pre-update",
            StagingEvent::Update(_) => "update",
            StagingEvent::Commit(_) => "commit",
            StagingEvent::Revert => "revert",
            StagingEvent::PostRevert => "post-revert",
        }
    }
}

type Observer = Box<dyn FnMut(&StagingEvent<'_>) + Send>;

/// Bucket decorator that stages writes until commit or revert
pub struct StagingBucket<B: Bucket> {
    /// Wrapped bucket holding committed data
    bucket: B,

    /// Net difference between the wrapped bucket and the merged view
    staged: BucketUpdate,

    /// Merged values of every field touched since the last commit/revert
    current: BucketData,

    observers: Vec<Observer>,
}

impl<B: Bucket> StagingBucket<B> {
    /// Wrap `bucket`
    pub fn new(bucket: B) -> Self {
        Self {
            bucket,
            staged: BucketUpdate::new(),
            current: BucketData::new(),
            observers: Vec::new(),
        }
    }

    /// Register an observer for staging events
    pub fn on_event<F>(&mut self, observer: F)
    where
        F: FnMut(&StagingEvent<'_>) + Send + 'static,
    {
        self.observers.push(Box::new(observer));
    }

    /// Borrow the wrapped bucket
    pub fn bucket(&self) -> &B {
        &self.bucket
    }

    /// Discard staged data and return the wrapped bucket
    pub fn into_inner(self) -> B {
        self.bucket
    }

    /// Whether there is uncommitted staged data
    pub fn is_dirty(&self) -> bool {
        !self.staged.is_empty()
    }

    /// Sparse staged delta against the wrapped bucket
    pub fn get_diff(&self) -> &BucketUpdate {
        &self.staged
    }

    /// Full merged value of every changed field
    pub fn get_filled_diff(&self) -> BucketData {
        self.staged
            .keys()
            .map(|name| (name.clone(), self.get_data_by_name(name).to_vec()))
            .collect()
    }

    /// Committed value of a field, ignoring staged writes
    pub fn get_original_data_by_name(&self, name: &str) -> &[Value] {
        self.bucket.get_data_by_name(name)
    }

    /// Apply the staged diff to the wrapped bucket and clear staging.
    ///
    /// Returns the committed diff.
    pub fn commit(&mut self) -> BucketUpdate {
        let diff = std::mem::take(&mut self.staged);
        self.current.clear();

        if !diff.is_empty() {
            self.bucket.set_values(&diff, MergeOptions::MERGE);
        }

        emit(&mut self.observers, StagingEvent::Commit(&diff));
        diff
    }

    /// Discard staged data.
    ///
    /// Returns the original values of every staged index. Indexes that did
    /// not exist in the wrapped bucket are left unset rather than assigned,
    /// so the data never extends a field. When `evented`, the revert is also
    /// announced as a regular write (pre-update, update) before the revert
    /// events so observers can treat it as a data change.
    pub fn revert(&mut self, evented: bool) -> BucketUpdate {
        let mut data = BucketUpdate::new();

        for (name, staged) in &self.staged {
            let original = self.bucket.get_data_by_name(name);
            let len = staged.len().max(original.len());

            let mut cells: Vec<Cell> = (0..len)
                .map(|i| match staged.get(i) {
                    Some(Cell::Unset) => Cell::Unset,
                    _ => original.get(i).cloned().map(Cell::Set).unwrap_or_default(),
                })
                .collect();

            while cells.last().map_or(false, Cell::is_unset) {
                cells.pop();
            }

            data.insert(name.clone(), cells);
        }

        if evented {
            emit(&mut self.observers, StagingEvent::PreUpdate(&data));
            emit(&mut self.observers, StagingEvent::Update(&data));
        }

        self.staged.clear();
        self.current.clear();

        emit(&mut self.observers, StagingEvent::Revert);
        emit(&mut self.observers, StagingEvent::PostRevert);

        data
    }

    /// Write directly to the wrapped bucket, bypassing staging.
    ///
    /// Staged changes to the same fields are kept and re-based on the new
    /// committed values.
    pub fn set_committed_values(&mut self, data: &BucketUpdate, options: MergeOptions) -> bool {
        if !self.bucket.set_values(data, options) {
            return false;
        }

        for name in data.keys() {
            match self.staged.get(name).cloned() {
                Some(cells) => {
                    let mut field = self.bucket.get_data_by_name(name).to_vec();
                    merge_field(&mut field, &cells, MergeOptions::MERGE);
                    self.current.insert(name.clone(), field);
                    self.restage(name);
                }
                None => {
                    self.current.remove(name);
                }
            }
        }

        true
    }

    fn would_change(&self, data: &BucketUpdate, options: MergeOptions) -> bool {
        data.iter().any(|(name, cells)| {
            let current = self.get_data_by_name(name);
            let mut next = current.to_vec();
            merge_field(&mut next, cells, options);
            next.as_slice() != current
        })
    }

    /// Recompute the staged cells of `name` from the merged view
    fn restage(&mut self, name: &str) {
        let diff = self
            .current
            .get(name)
            .and_then(|current| diff_field(self.bucket.get_data_by_name(name), current));

        match diff {
            Some(cells) => {
                self.staged.insert(name.to_string(), cells);
            }
            None => {
                self.staged.remove(name);
                self.current.remove(name);
            }
        }
    }
}

impl<B: Bucket> Bucket for StagingBucket<B> {
    fn set_values(&mut self, data: &BucketUpdate, options: MergeOptions) -> bool {
        if !self.would_change(data, options) {
            return false;
        }

        emit(&mut self.observers, StagingEvent::PreUpdate(data));

        for (name, cells) in data {
            if !self.current.contains_key(name) {
                let original = self.bucket.get_data_by_name(name).to_vec();
                self.current.insert(name.clone(), original);
            }

            if let Some(field) = self.current.get_mut(name) {
                merge_field(field, cells, options);
            }

            self.restage(name);
        }

        emit(&mut self.observers, StagingEvent::Update(data));
        true
    }

    fn get_data_by_name(&self, name: &str) -> &[Value] {
        match self.current.get(name) {
            Some(values) => values,
            None => self.bucket.get_data_by_name(name),
        }
    }

    fn get_data(&self) -> BucketData {
        let mut data = self.bucket.get_data();
        for (name, values) in &self.current {
            data.insert(name.clone(), values.clone());
        }
        data
    }
}

impl<B: Bucket + fmt::Debug> fmt::Debug for StagingBucket<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StagingBucket")
            .field("bucket", &self.bucket)
            .field("staged", &self.staged)
            .field("observers", &self.observers.len())
            .finish()
    }
}

fn emit(observers: &mut [Observer], event: StagingEvent<'_>) {
    for observer in observers.iter_mut() {
        observer(&event);
    }
}
