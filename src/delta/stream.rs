//! Selection and ordering of a document's pending delta entries

use crate::core::types::{DeltaEntry, DeltaType, StepId, TypedDelta, UnixTs};
use crate::storage::Document;
use std::iter::Peekable;

/// Entries of one stream that are ready to publish, in timestamp order.
///
/// Entries at or before the stream's published timestamp are skipped. Data
/// entries produced by a step beyond `top_saved_step_id` are withheld along
/// with everything after them; rating entries are never step constrained.
pub fn pending_entries(document: &Document, delta_type: DeltaType) -> Vec<&DeltaEntry> {
    let published = document.delta_published_ts.get(delta_type);
    let step_limit = match delta_type {
        DeltaType::Data => document.top_saved_step_id,
        DeltaType::Ratedata => None,
    };

    let mut entries: Vec<&DeltaEntry> = document.rdelta.stream(delta_type).iter().collect();
    entries.sort_by_key(|entry| entry.timestamp);

    entries
        .into_iter()
        .filter(|entry| is_unpublished(entry, published))
        .take_while(|entry| is_step_saved(entry, step_limit))
        .collect()
}

fn is_unpublished(entry: &DeltaEntry, published: Option<UnixTs>) -> bool {
    published.map_or(true, |ts| entry.timestamp > ts)
}

fn is_step_saved(entry: &DeltaEntry, step_limit: Option<StepId>) -> bool {
    match (entry.step_id, step_limit) {
        (Some(step), Some(limit)) => step <= limit,
        _ => true,
    }
}

/// Every pending entry of the document, both streams merged by timestamp
pub fn pending_deltas(document: &Document) -> Vec<TypedDelta> {
    MergedStreams::new(
        pending_entries(document, DeltaType::Data),
        pending_entries(document, DeltaType::Ratedata),
    )
    .collect()
}

/// Two-way merge of already sorted streams.
///
/// On equal timestamps the data entry comes first.
pub struct MergedStreams<'a> {
    data: Peekable<std::vec::IntoIter<&'a DeltaEntry>>,
    ratedata: Peekable<std::vec::IntoIter<&'a DeltaEntry>>,
}

impl<'a> MergedStreams<'a> {
    /// Merge the two streams
    pub fn new(data: Vec<&'a DeltaEntry>, ratedata: Vec<&'a DeltaEntry>) -> Self {
        Self {
            data: data.into_iter().peekable(),
            ratedata: ratedata.into_iter().peekable(),
        }
    }
}

impl Iterator for MergedStreams<'_> {
    type Item = TypedDelta;

    fn next(&mut self) -> Option<TypedDelta> {
        let take_data = match (self.data.peek(), self.ratedata.peek()) {
            (Some(data), Some(rate)) => data.timestamp <= rate.timestamp,
            (Some(_), None) => true,
            (None, Some(_)) => false,
            (None, None) => return None,
        };

        let (delta_type, entry) = if take_data {
            (DeltaType::Data, self.data.next()?)
        } else {
            (DeltaType::Ratedata, self.ratedata.next()?)
        };

        Some(TypedDelta {
            delta_type,
            entry: entry.clone(),
        })
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let len = self.data.len() + self.ratedata.len();
        (len, Some(len))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::BucketDelta;

    fn entry(ts: UnixTs) -> DeltaEntry {
        DeltaEntry::new(ts, BucketDelta::new())
    }

    fn order(deltas: &[TypedDelta]) -> Vec<(DeltaType, UnixTs)> {
        deltas
            .iter()
            .map(|delta| (delta.delta_type, delta.entry.timestamp))
            .collect()
    }

    #[test]
    fn test_merge_interleaves_by_timestamp() {
        let mut doc = Document::new(1);
        doc.rdelta.data = vec![entry(1), entry(4), entry(6)];
        doc.rdelta.ratedata = vec![entry(2), entry(4), entry(9)];

        assert_eq!(
            order(&pending_deltas(&doc)),
            vec![
                (DeltaType::Data, 1),
                (DeltaType::Ratedata, 2),
                (DeltaType::Data, 4),
                (DeltaType::Ratedata, 4),
                (DeltaType::Data, 6),
                (DeltaType::Ratedata, 9),
            ]
        );
    }

    #[test]
    fn test_unsorted_stream_is_ordered() {
        let mut doc = Document::new(1);
        doc.rdelta.data = vec![entry(5), entry(1), entry(3)];

        let ts: Vec<UnixTs> = pending_entries(&doc, DeltaType::Data)
            .iter()
            .map(|e| e.timestamp)
            .collect();
        assert_eq!(ts, vec![1, 3, 5]);
    }

    #[test]
    fn test_published_entries_excluded() {
        let mut doc = Document::new(1);
        doc.rdelta.data = vec![entry(1), entry(3), entry(5)];
        doc.rdelta.ratedata = vec![entry(2), entry(4)];
        doc.delta_published_ts.set(DeltaType::Data, 3);

        assert_eq!(
            order(&pending_deltas(&doc)),
            vec![(DeltaType::Ratedata, 2), (DeltaType::Ratedata, 4), (DeltaType::Data, 5)]
        );
    }

    #[test]
    fn test_unsaved_step_withholds_data_only() {
        let mut doc = Document::new(1);
        doc.top_saved_step_id = Some(2);
        doc.rdelta.data = vec![entry(1).with_step(1), entry(3).with_step(3), entry(5).with_step(2)];
        doc.rdelta.ratedata = vec![entry(4).with_step(3)];

        assert_eq!(
            order(&pending_deltas(&doc)),
            vec![(DeltaType::Data, 1), (DeltaType::Ratedata, 4)]
        );
    }

    #[test]
    fn test_no_saved_step_places_no_limit() {
        let mut doc = Document::new(1);
        doc.rdelta.data = vec![entry(1).with_step(7), entry(2)];

        assert_eq!(pending_entries(&doc, DeltaType::Data).len(), 2);
    }
}
