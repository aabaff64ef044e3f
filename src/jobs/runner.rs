//! Queue worker loop. One OS thread per running job, throttled to the
//! configured thread count; the receiving loop itself never blocks on a job.

use std::sync::{
    atomic::{AtomicU16, Ordering},
    mpsc, Arc,
};
use std::thread::sleep;
use std::time::Duration;

use crate::jobs::store::JobStore;
use crate::pipeline::{self, PipelineContext, VideoRequest};

#[derive(Clone, Debug)]
pub enum Task {
    /// Analyze one video end to end.
    Analyze(VideoRequest),

    /// Request to gracefully shut the queue down.
    Shutdown,
}

/// Claim a worker slot, backing off while the pool is full. The increment
/// is the bound check, one atomic operation, so concurrent claims cannot
/// overshoot `max_threads`.
fn acquire_slot(counter: &AtomicU16, max_threads: u16) {
    loop {
        if counter.fetch_add(1, Ordering::Relaxed) < max_threads {
            return;
        }
        counter.fetch_sub(1, Ordering::Relaxed);
        sleep(Duration::from_millis(100));
    }
}

pub fn start_queue(task_rx: mpsc::Receiver<Task>, ctx: Arc<PipelineContext>, store: Arc<JobStore>) {
    let thread_ctr = Arc::new(AtomicU16::new(0));
    let max_threads = ctx.config.task_queue_max_threads;

    log::debug!("waiting for job");
    while let Ok(task) = task_rx.recv() {
        let ctx = ctx.clone();
        let store = store.clone();
        let thread_counter = thread_ctr.clone();

        // graceful shutdown
        if let Task::Shutdown = &task {
            while thread_counter.load(Ordering::Relaxed) > 0 {
                sleep(Duration::from_millis(100));
            }
            return;
        }

        let Task::Analyze(request) = task else {
            continue;
        };
        let video_id = request.video_id.clone();

        let task_handle = std::thread::spawn({
            let thread_counter = thread_counter.clone();
            let store = store.clone();
            let video_id = video_id.clone();
            move || {
                acquire_slot(&thread_counter, max_threads);

                if !store.begin(&video_id) {
                    log::debug!("job for video {video_id} no longer pending, skipping");
                    return;
                }

                match pipeline::run(&ctx, &request) {
                    Ok(analysis) => {
                        log::info!("job for video {video_id} done");
                        store.complete(&video_id, analysis);
                    }
                    Err(err) => {
                        log::error!("job for video {video_id} failed: {err:#}");
                        store.fail(&video_id, format!("{err:#}"));
                    }
                }
            }
        });

        // handle worker panics
        std::thread::spawn(move || {
            if let Err(err) = task_handle.join() {
                log::error!("worker panicked: {err:?}");
                store.fail(&video_id, "worker panicked".to_string());
            }

            thread_counter.fetch_sub(1, Ordering::Relaxed);
        });
    }
}
