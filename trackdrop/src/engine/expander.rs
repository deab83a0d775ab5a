//! Collection expansion.

use std::iter::Enumerate;
use std::vec::IntoIter;

use tracing::info;

use super::PipelineError;
use super::job::{Item, Job};
use super::traits::Metadata;

/// Turn a probed collection into its items, in source order.
///
/// Fails with `EmptyCollection` when there are no entries or none of them can be
/// resolved; otherwise returns a lazy sequence that skips unusable entries.
pub fn expand(job: &Job, metadata: Metadata) -> Result<ItemSequence, PipelineError> {
    let entries = metadata.entries.unwrap_or_default();
    if !entries
        .iter()
        .any(|entry| entry.as_ref().is_some_and(Metadata::is_resolvable))
    {
        return Err(PipelineError::EmptyCollection);
    }

    Ok(ItemSequence {
        job_id: job.id.clone(),
        source_url: job.request.url.clone(),
        title: metadata.title,
        total: entries.len(),
        skipped: 0,
        entries: entries.into_iter().enumerate(),
    })
}

/// Lazy, ordered sequence of collection items.
#[derive(Debug)]
pub struct ItemSequence {
    job_id: String,
    source_url: String,
    title: String,
    total: usize,
    skipped: usize,
    entries: Enumerate<IntoIter<Option<Metadata>>>,
}

impl ItemSequence {
    /// Number of entries in the source list, usable or not.
    pub fn total(&self) -> usize {
        self.total
    }

    /// Entries skipped so far.
    pub fn skipped(&self) -> usize {
        self.skipped
    }

    pub fn title(&self) -> &str {
        &self.title
    }
}

impl Iterator for ItemSequence {
    type Item = Item;

    fn next(&mut self) -> Option<Item> {
        loop {
            let (index, entry) = self.entries.next()?;
            match entry {
                None => {
                    info!(
                        job_id = %self.job_id,
                        "Skipping unavailable entry {} of {}",
                        index + 1,
                        self.source_url
                    );
                    self.skipped += 1;
                }
                Some(entry) if !entry.is_resolvable() => {
                    info!(
                        job_id = %self.job_id,
                        "No URL for entry {} of {}, skipping",
                        index + 1,
                        self.source_url
                    );
                    self.skipped += 1;
                }
                Some(entry) => {
                    return Some(Item::from_entry(&self.job_id, index, self.total, entry));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::job::{MediaRequest, RequestKind};

    fn job() -> Job {
        Job::new(
            1,
            MediaRequest {
                url: "https://youtube.com/playlist?list=PL".into(),
                kind: RequestKind::Collection,
            },
        )
    }

    fn entry(id: &str) -> Option<Metadata> {
        Some(Metadata {
            content_id: id.into(),
            title: id.to_uppercase(),
            source_url: format!("https://youtu.be/{id}"),
            ..Default::default()
        })
    }

    fn collection(entries: Option<Vec<Option<Metadata>>>) -> Metadata {
        Metadata {
            title: "Mix".into(),
            is_collection: true,
            entries,
            ..Default::default()
        }
    }

    #[test]
    fn test_items_keep_source_order_and_skip_gaps() {
        let unresolvable = Some(Metadata {
            content_id: "c".into(),
            ..Default::default()
        });
        let job = job();
        let mut seq = expand(
            &job,
            collection(Some(vec![entry("a"), None, unresolvable, entry("d")])),
        )
        .unwrap();
        assert_eq!(seq.total(), 4);
        assert_eq!(seq.title(), "Mix");

        let first = seq.next().unwrap();
        assert_eq!(first.ordinal_index, 0);
        assert_eq!(first.position_label().as_deref(), Some("(1/4) A"));
        assert_eq!(seq.skipped(), 0);

        let second = seq.next().unwrap();
        assert_eq!(second.ordinal_index, 3);
        assert_eq!(second.identifier, "https://youtu.be/d");
        assert_eq!(second.parent_job_id, job.id);
        assert_eq!(seq.skipped(), 2);

        assert!(seq.next().is_none());
    }

    #[test]
    fn test_empty_collection() {
        let job = job();
        assert_eq!(
            expand(&job, collection(None)).unwrap_err(),
            PipelineError::EmptyCollection
        );
        assert_eq!(
            expand(&job, collection(Some(vec![]))).unwrap_err(),
            PipelineError::EmptyCollection
        );
        assert_eq!(
            expand(&job, collection(Some(vec![None, None]))).unwrap_err(),
            PipelineError::EmptyCollection
        );
    }
}
