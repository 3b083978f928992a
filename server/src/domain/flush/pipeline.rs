//! Flush Event Pipeline
//!
//! Consumes queued flush events and hands each to the sink without waiting
//! for the previous flush's inserts to finish.

use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use super::sink::FlushSink;
use super::types::FlushEvent;

pub struct FlushPipeline {
    sink: Arc<FlushSink>,
}

impl FlushPipeline {
    pub fn new(sink: Arc<FlushSink>) -> Self {
        Self { sink }
    }

    pub fn start(
        self,
        mut events: mpsc::Receiver<FlushEvent>,
        mut shutdown_rx: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    changed = shutdown_rx.changed() => {
                        if changed.is_err() || *shutdown_rx.borrow() {
                            tracing::debug!("FlushPipeline received shutdown, draining...");
                            break;
                        }
                    }
                    event = events.recv() => {
                        match event {
                            Some(event) => self.run(event),
                            None => break,
                        }
                    }
                }
            }

            // Drain events accepted before shutdown
            events.close();
            let mut drained = 0usize;
            while let Some(event) = events.recv().await {
                self.run(event);
                drained += 1;
            }
            tracing::debug!(drained, "FlushPipeline shutdown complete");
        })
    }

    fn run(&self, event: FlushEvent) {
        tracing::trace!(
            timestamp = event.timestamp,
            metrics = event.metrics.len(),
            "Dispatching flush"
        );
        // Inserts are tracked by the sink; shutdown waits for them there
        let _ = self.sink.on_flush(event);
    }
}
