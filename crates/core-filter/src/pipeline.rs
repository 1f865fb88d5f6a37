//! Per-query pipeline wiring: producer → stage → destination.

use std::sync::Arc;
use std::thread;

use crossbeam_channel::bounded;

use core_hub::{CancelToken, Latch};
use core_source::{LineProducer, MemoryBuffer};

use crate::stage::FilterStage;

/// One query's dataflow. Channels are rendezvous channels, so a fast
/// producer or matcher is throttled to the destination's speed. The
/// pipeline owns its cancel token; a superseding query cancels it and every
/// thread unwinds cooperatively.
pub struct Pipeline {
    source: Arc<dyn LineProducer>,
    stage: Arc<FilterStage>,
    destination: Arc<MemoryBuffer>,
    token: CancelToken,
    done: Latch,
}

impl Pipeline {
    pub fn new(
        source: Arc<dyn LineProducer>,
        stage: FilterStage,
        destination: Arc<MemoryBuffer>,
        token: CancelToken,
    ) -> Self {
        Self {
            source,
            stage: Arc::new(stage),
            destination,
            token,
            done: Latch::new(),
        }
    }

    /// Fires when the destination drained its input or the run was
    /// cancelled.
    pub fn done(&self) -> &Latch {
        &self.done
    }

    pub fn destination(&self) -> &Arc<MemoryBuffer> {
        &self.destination
    }

    /// Run the pipeline to completion on the calling thread.
    pub fn run(&self) {
        let (src_tx, src_rx) = bounded(0);
        let (dst_tx, dst_rx) = bounded(0);

        let producer = {
            let source = Arc::clone(&self.source);
            let token = self.token.clone();
            thread::spawn(move || source.produce(&token, &src_tx))
        };
        let stage = {
            let stage = Arc::clone(&self.stage);
            let token = self.token.clone();
            thread::spawn(move || stage.accept(&token, src_rx, dst_tx))
        };

        self.destination.accept(&self.token, &dst_rx);
        let _ = producer.join();
        let _ = stage.join();
        self.done.fire();
    }
}
