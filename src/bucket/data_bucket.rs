//! Plain in-memory bucket holding committed document data

use crate::bucket::{merge_field, Bucket, MergeOptions};
use crate::core::types::{BucketData, BucketUpdate, Value};

/// Bucket backed directly by a field map
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DataBucket {
    data: BucketData,
}

impl DataBucket {
    /// Create an empty bucket
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a bucket holding an existing snapshot
    pub fn from_data(data: BucketData) -> Self {
        Self { data }
    }

    /// Borrow the underlying snapshot
    pub fn data(&self) -> &BucketData {
        &self.data
    }

    /// Consume the bucket, returning its snapshot
    pub fn into_data(self) -> BucketData {
        self.data
    }
}

impl From<BucketData> for DataBucket {
    fn from(data: BucketData) -> Self {
        Self::from_data(data)
    }
}

impl Bucket for DataBucket {
    fn set_values(&mut self, data: &BucketUpdate, options: MergeOptions) -> bool {
        let mut changed = false;

        for (name, cells) in data {
            let mut field = self.get_data_by_name(name).to_vec();
            merge_field(&mut field, cells, options);

            if field.as_slice() != self.get_data_by_name(name) {
                self.data.insert(name.clone(), field);
                changed = true;
            }
        }

        changed
    }

    fn get_data_by_name(&self, name: &str) -> &[Value] {
        self.data.get(name).map(Vec::as_slice).unwrap_or(&[])
    }

    fn get_data(&self) -> BucketData {
        self.data.clone()
    }
}
