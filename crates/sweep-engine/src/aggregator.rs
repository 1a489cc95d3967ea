//! Merges per-stream reads into one bounded, ordered collection.

use std::collections::HashSet;

use crate::collector::StreamRecords;
use crate::types::{
    sort_chronologically, CollectionResult, Record, StreamStatus, StreamSummary,
};

/// Which records survive when the merged total exceeds the limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TruncationOrder {
    /// Keep streams in resolver order, filling the limit front to back.
    StreamOrder,
    /// Keep the newest records across all streams.
    MostRecentFirst,
}

/// Output is grouped by stream in input order, each group oldest first, and
/// never holds more than `limit` top-level records.
pub fn merge(
    per_stream: Vec<StreamRecords>,
    limit: Option<usize>,
    order: TruncationOrder,
    cancelled: bool,
) -> CollectionResult {
    let mut groups = per_stream
        .into_iter()
        .map(|mut group| {
            let mut seen = HashSet::new();
            group.records.retain(|record| seen.insert(record.id.clone()));
            for record in &mut group.records {
                record.stream_id = group.stream.id.clone();
                if record.stream_name.is_none() {
                    record.stream_name = Some(group.stream.display_name.clone());
                }
            }
            sort_chronologically(&mut group.records);
            group
        })
        .collect::<Vec<_>>();

    let keep = match order {
        TruncationOrder::StreamOrder => keep_in_stream_order(&groups, limit),
        TruncationOrder::MostRecentFirst => keep_most_recent(&groups, limit),
    };

    let mut records = Vec::new();
    let mut streams = Vec::with_capacity(groups.len());
    for (group, kept) in groups.iter_mut().zip(keep) {
        let dropped = kept.len() < group.records.len();
        let mut taken = std::mem::take(&mut group.records);
        let mut index = 0;
        taken.retain(|_| {
            let keep = kept.contains(&index);
            index += 1;
            keep
        });
        let status = match &group.status {
            StreamStatus::Completed if dropped => StreamStatus::LimitReached,
            status => status.clone(),
        };
        streams.push(StreamSummary {
            stream_id: group.stream.id.clone(),
            stream_name: group.stream.display_name.clone(),
            status,
            records: taken.len(),
        });
        records.extend(taken);
    }

    CollectionResult {
        records,
        streams,
        cancelled,
    }
}

fn keep_in_stream_order(groups: &[StreamRecords], limit: Option<usize>) -> Vec<HashSet<usize>> {
    let mut remaining = limit.unwrap_or(usize::MAX);
    groups
        .iter()
        .map(|group| {
            let take = group.records.len().min(remaining);
            remaining -= take;
            (0..take).collect()
        })
        .collect()
}

fn keep_most_recent(groups: &[StreamRecords], limit: Option<usize>) -> Vec<HashSet<usize>> {
    let mut ranked = groups
        .iter()
        .enumerate()
        .flat_map(|(group_index, group)| {
            group
                .records
                .iter()
                .enumerate()
                .map(move |(index, record)| (group_index, index, record))
        })
        .collect::<Vec<(usize, usize, &Record)>>();
    ranked.sort_by(|left, right| {
        let left_key = left.2.timestamp_micros().unwrap_or(0);
        let right_key = right.2.timestamp_micros().unwrap_or(0);
        right_key
            .cmp(&left_key)
            .then_with(|| left.0.cmp(&right.0))
    });
    ranked.truncate(limit.unwrap_or(usize::MAX));

    let mut keep = vec![HashSet::new(); groups.len()];
    for (group_index, index, _) in ranked {
        keep[group_index].insert(index);
    }
    keep
}
