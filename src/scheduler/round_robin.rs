use crate::scheduler::{stop_after_error, BatchStream, DataSource, Scheduler, SourceCursor};

/// Takes one batch from each source in turn, skipping sources that have run
/// out, until all are exhausted.
#[derive(Debug, Clone, Copy, Default)]
pub struct RoundRobinScheduler;

impl Scheduler for RoundRobinScheduler {
    fn get_batches<'a, S: DataSource>(
        &mut self,
        sources: &'a mut [S],
    ) -> BatchStream<'a, S::Inputs, S::Labels> {
        let mut cursors: Vec<_> = sources.iter_mut().map(|s| SourceCursor::open(s)).collect();
        let mut turn = 0;
        stop_after_error(std::iter::from_fn(move || {
            while !cursors.iter().all(|c| c.is_done()) {
                let current = turn;
                turn = (turn + 1) % cursors.len();
                if let Some(item) = cursors[current].next_batch() {
                    return Some(item);
                }
            }
            None
        }))
    }
}
