use std::{collections::HashSet, future::Future, time::Duration};

use anyhow::Result;
use ptproute_netlink::{types::addr::AddrFamily, Netlink};
use rand::Rng;
use thiserror::Error;
use tracing::{debug, warn};

pub const MAX_ATTEMPTS: u32 = 10;
const BASE_SLEEP_MS: u64 = 20;
const MAX_SLEEP_MS: u64 = 10_000;
const START_JITTER: u32 = 1000;

#[derive(Error, Debug)]
pub enum TableError {
    #[error("no free routing table found from {0}")]
    NoFreeTable(u32),

    #[error("failed to allocate a routing table after {0} attempts")]
    Exhausted(u32),
}

impl TableError {
    pub fn code(&self) -> u32 {
        match self {
            TableError::NoFreeTable(_) => 100,
            TableError::Exhausted(_) => 11,
        }
    }
}

/// Outcome of a failed attempt to populate a candidate table.
#[derive(Debug)]
pub enum AttemptError {
    /// Someone else holds the table; pick another and retry.
    Collision(anyhow::Error),
    Fatal(anyhow::Error),
}

/// Lowest id `>= start` not in `used`.
pub fn first_free(used: &HashSet<u32>, start: u32) -> Result<u32, TableError> {
    (start..=u32::MAX)
        .find(|table| !used.contains(table))
        .ok_or(TableError::NoFreeTable(start))
}

/// Tables referenced by any IPv4 or IPv6 policy rule.
pub fn used_tables(netlink: &mut Netlink) -> Result<HashSet<u32>> {
    let mut used = HashSet::new();
    for family in [AddrFamily::V4, AddrFamily::V6] {
        used.extend(netlink.rule_list(family)?.into_iter().map(|rule| rule.table));
    }
    Ok(used)
}

pub fn find_free_table(netlink: &mut Netlink, start: u32) -> Result<u32> {
    Ok(first_free(&used_tables(netlink)?, start)?)
}

/// Full-jitter exponential backoff for `attempt` (0-based).
pub fn backoff(attempt: u32, rng: &mut impl Rng) -> Duration {
    let ceiling = (BASE_SLEEP_MS << attempt.min(20)).min(MAX_SLEEP_MS);

    Duration::from_millis(rng.gen_range(0..ceiling))
}

/// Runs `attempt` against jittered candidate table ids until one sticks.
///
/// `attempt` receives a search start and returns the table it claimed.
pub async fn acquire<R, F>(start: u32, rng: &mut R, mut attempt: F) -> Result<u32>
where
    R: Rng,
    F: FnMut(u32) -> Result<u32, AttemptError>,
{
    acquire_with(start, rng, &mut attempt, |d| tokio::time::sleep(d)).await
}

async fn acquire_with<R, F, S, Fut>(start: u32, rng: &mut R, attempt: &mut F, sleep: S) -> Result<u32>
where
    R: Rng,
    F: FnMut(u32) -> Result<u32, AttemptError>,
    S: Fn(Duration) -> Fut,
    Fut: Future<Output = ()>,
{
    for n in 0..MAX_ATTEMPTS {
        let candidate = start.saturating_add(rng.gen_range(0..START_JITTER));

        match attempt(candidate) {
            Ok(table) => {
                debug!("claimed routing table {table} on attempt {}", n + 1);
                return Ok(table);
            }
            Err(AttemptError::Fatal(e)) => return Err(e),
            Err(AttemptError::Collision(e)) => {
                warn!("routing table collision on attempt {}: {e:#}", n + 1);
                if n + 1 < MAX_ATTEMPTS {
                    sleep(backoff(n, rng)).await;
                }
            }
        }
    }

    Err(TableError::Exhausted(MAX_ATTEMPTS).into())
}

#[cfg(test)]
mod tests {
    use std::{cell::RefCell, rc::Rc};

    use anyhow::anyhow;
    use rand::{rngs::StdRng, SeedableRng};

    use super::*;

    #[test]
    fn test_skips_occupied_tables() {
        let used: HashSet<u32> = (256..=260).collect();
        assert_eq!(first_free(&used, 256).unwrap(), 261);
        assert_eq!(first_free(&used, 100).unwrap(), 100);
    }

    #[test]
    fn test_first_free_is_never_used() {
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..200 {
            let used: HashSet<u32> = (0..50).map(|_| rng.gen_range(256..320)).collect();
            let start = rng.gen_range(256..300);

            let table = first_free(&used, start).unwrap();
            assert!(table >= start);
            assert!(!used.contains(&table));
        }
    }

    #[test]
    fn test_no_free_table() {
        let used: HashSet<u32> = [u32::MAX - 1, u32::MAX].into_iter().collect();
        let err = first_free(&used, u32::MAX - 1).unwrap_err();
        assert_eq!(err.code(), 100);
    }

    #[test]
    fn test_backoff_is_bounded() {
        let mut rng = StdRng::seed_from_u64(1);
        for attempt in 0..64 {
            let ceiling = (BASE_SLEEP_MS << attempt.min(20)).min(MAX_SLEEP_MS);
            assert!(backoff(attempt, &mut rng) < Duration::from_millis(ceiling));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_collision_then_success() {
        let mut rng = StdRng::seed_from_u64(3);
        let mut calls = 0;

        let table = acquire(256, &mut rng, |candidate| {
            calls += 1;
            assert!((256..256 + START_JITTER).contains(&candidate));
            if calls < 3 {
                Err(AttemptError::Collision(anyhow!("file exists")))
            } else {
                Ok(candidate)
            }
        })
        .await
        .unwrap();

        assert_eq!(calls, 3);
        assert!(table >= 256);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fatal_stops_retrying() {
        let mut rng = StdRng::seed_from_u64(3);
        let mut calls = 0;

        let err = acquire(256, &mut rng, |_| {
            calls += 1;
            Err(AttemptError::Fatal(anyhow!("permission denied")))
        })
        .await
        .unwrap_err();

        assert_eq!(calls, 1);
        assert_eq!(err.to_string(), "permission denied");
    }

    #[tokio::test]
    async fn test_exhaustion_does_not_sleep_after_last_attempt() {
        let mut rng = StdRng::seed_from_u64(5);
        let sleeps = RefCell::new(0);

        let err = acquire_with(
            256,
            &mut rng,
            &mut |_: u32| -> Result<u32, AttemptError> {
                Err(AttemptError::Collision(anyhow!("file exists")))
            },
            |_| {
                *sleeps.borrow_mut() += 1;
                async {}
            },
        )
        .await
        .unwrap_err();

        assert_eq!(*sleeps.borrow(), MAX_ATTEMPTS - 1);
        assert_eq!(
            err.downcast_ref::<TableError>().map(TableError::code),
            Some(11)
        );
    }

    // Both sides start from the same seed, so the first candidates collide.
    // The insert into the shared set stands in for the seed route add.
    #[tokio::test(start_paused = true)]
    async fn test_concurrent_acquire_never_shares_a_table() {
        let claimed: Rc<RefCell<HashSet<u32>>> = Rc::default();

        let claim = |claimed: Rc<RefCell<HashSet<u32>>>| {
            move |table: u32| -> Result<u32, AttemptError> {
                if claimed.borrow_mut().insert(table) {
                    Ok(table)
                } else {
                    Err(AttemptError::Collision(anyhow!("table {table} taken")))
                }
            }
        };

        for seed in 0..20 {
            claimed.borrow_mut().clear();
            let mut rng_a = StdRng::seed_from_u64(seed);
            let mut rng_b = StdRng::seed_from_u64(seed);

            let (a, b) = tokio::join!(
                acquire(256, &mut rng_a, claim(claimed.clone())),
                acquire(256, &mut rng_b, claim(claimed.clone())),
            );

            assert_ne!(a.unwrap(), b.unwrap());
        }
    }
}
