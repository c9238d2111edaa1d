use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

use crate::scheduler::{stop_after_error, BatchStream, DataSource, Scheduler, SourceCursor};

/// Draws sources in a random order where each source appears exactly as many
/// times as it has batches. Batches within a source keep their order.
#[derive(Debug)]
pub struct ShuffledScheduler {
    rng: StdRng,
}

impl ShuffledScheduler {
    /// A fixed `seed` makes the epoch orders reproducible.
    pub fn new(seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };
        ShuffledScheduler { rng }
    }
}

impl Scheduler for ShuffledScheduler {
    fn get_batches<'a, S: DataSource>(
        &mut self,
        sources: &'a mut [S],
    ) -> BatchStream<'a, S::Inputs, S::Labels> {
        let mut cursors: Vec<_> = sources.iter_mut().map(|s| SourceCursor::open(s)).collect();
        let mut order: Vec<usize> = cursors
            .iter()
            .enumerate()
            .flat_map(|(i, cursor)| std::iter::repeat(i).take(cursor.expected()))
            .collect();
        order.shuffle(&mut self.rng);

        let mut order = order.into_iter();
        let mut verify = 0;
        stop_after_error(std::iter::from_fn(move || {
            if let Some(i) = order.next() {
                return cursors[i].next_batch();
            }
            // Every declared batch has been drawn; surface any source with extras.
            while verify < cursors.len() {
                let item = cursors[verify].next_batch();
                verify += 1;
                if item.is_some() {
                    return item;
                }
            }
            None
        }))
    }
}
