// tests/partition.rs
use event_filtration::{partition, PipelineError, Shard};
use rand::Rng;

#[test]
fn sixty_three_rows_five_workers() {
    let shards = partition(63, 5).unwrap();
    let ranges: Vec<(usize, usize)> = shards.iter().map(|s| (s.start, s.finish)).collect();
    assert_eq!(ranges, vec![(0, 13), (13, 26), (26, 39), (39, 52), (52, 63)]);
}

#[test]
fn zero_workers_is_an_argument_error() {
    assert!(matches!(partition(10, 0), Err(PipelineError::InvalidWorkerCount)));
}

#[test]
fn empty_table_has_no_shards() {
    assert!(partition(0, 4).unwrap().is_empty());
}

#[test]
fn random_partitions_cover_every_row_exactly_once() {
    let mut rng = rand::rng();
    for _ in 0..2_000 {
        let total = rng.random_range(1..5_000usize);
        let workers = rng.random_range(1..64usize);
        let shards = partition(total, workers).unwrap();

        assert!(!shards.is_empty());
        assert!(shards.len() <= workers, "N={total} P={workers}: {} shards", shards.len());
        assert_eq!(shards[0].start, 0);
        assert_eq!(shards.last().map(|s| s.finish), Some(total));
        for w in shards.windows(2) {
            assert_eq!(w[0].finish, w[1].start, "gap or overlap at {}", w[0]);
        }
        assert!(shards.iter().all(|s| !s.is_empty()));
        assert_eq!(shards.iter().map(Shard::len).sum::<usize>(), total);
    }
}

#[test]
fn more_workers_than_rows() {
    let shards = partition(3, 10).unwrap();
    assert_eq!(
        shards,
        vec![Shard::new(0, 1), Shard::new(1, 2), Shard::new(2, 3)]
    );
}
