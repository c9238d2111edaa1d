use crate::scheduler::{stop_after_error, BatchStream, DataSource, Scheduler, SourceCursor};

/// Exhausts each source in the order given before moving to the next.
#[derive(Debug, Clone, Copy, Default)]
pub struct SequentialScheduler;

impl Scheduler for SequentialScheduler {
    fn get_batches<'a, S: DataSource>(
        &mut self,
        sources: &'a mut [S],
    ) -> BatchStream<'a, S::Inputs, S::Labels> {
        stop_after_error(sources.iter_mut().flat_map(|source| {
            let mut cursor = SourceCursor::open(source);
            std::iter::from_fn(move || cursor.next_batch())
        }))
    }
}
