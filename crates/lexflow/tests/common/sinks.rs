//! Sink doubles that refuse every write.

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;

use lexflow::sinks::{
    ReviewTaskRequest, ReviewTaskSink, SinkError, TimelineEvent, TimelineSink,
};

/// Timeline that is always down; counts the appends it turned away.
#[derive(Default)]
pub struct DownTimeline {
    rejected: AtomicUsize,
}

impl DownTimeline {
    pub fn rejected(&self) -> usize {
        self.rejected.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TimelineSink for DownTimeline {
    async fn append(&self, _event: TimelineEvent) -> Result<(), SinkError> {
        self.rejected.fetch_add(1, Ordering::SeqCst);
        Err(SinkError::Unavailable("timeline service offline".into()))
    }
}

/// Review task service that is always down.
#[derive(Default)]
pub struct DownReviewTasks {
    rejected: AtomicUsize,
}

impl DownReviewTasks {
    pub fn rejected(&self) -> usize {
        self.rejected.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ReviewTaskSink for DownReviewTasks {
    async fn create_review_task(&self, _request: ReviewTaskRequest) -> Result<String, SinkError> {
        self.rejected.fetch_add(1, Ordering::SeqCst);
        Err(SinkError::Unavailable("task service offline".into()))
    }
}
