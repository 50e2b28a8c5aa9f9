use std::collections::HashSet;

use rand::seq::SliceRandom;
use rand::Rng;

/// Expands `queries` toward `target` search strings using pairwise combinations.
///
/// - `target < N`: a random subset of `target` single queries.
/// - `target > N + N(N-1)/2`: every single query plus every unordered pair.
/// - otherwise: every single query plus `target - N` distinct random pairs.
///
/// Pairs are joined with a space.
pub fn combine_queries(queries: &[String], target: usize) -> Vec<String> {
    combine_queries_with(queries, target, &mut rand::thread_rng())
}

pub fn combine_queries_with<R: Rng + ?Sized>(
    queries: &[String],
    target: usize,
    rng: &mut R,
) -> Vec<String> {
    let n = queries.len();
    if target < n {
        return queries.choose_multiple(rng, target).cloned().collect();
    }

    let total_pairs = n * n.saturating_sub(1) / 2;
    let wanted_pairs = if target > n + total_pairs {
        total_pairs
    } else {
        target - n
    };

    let mut combined = queries.to_vec();
    combined.extend(
        pick_pairs(n, wanted_pairs, rng)
            .into_iter()
            .map(|(i, j)| format!("{} {}", queries[i], queries[j])),
    );
    combined
}

/// Picks `count` distinct index pairs `(i, j)` with `i < j < n`.
fn pick_pairs<R: Rng + ?Sized>(n: usize, count: usize, rng: &mut R) -> Vec<(usize, usize)> {
    let total = n * n.saturating_sub(1) / 2;
    if count == 0 {
        return Vec::new();
    }

    // Dense requests: enumerate and shuffle instead of rejection sampling
    if count * 2 >= total {
        let mut all: Vec<(usize, usize)> = (0..n)
            .flat_map(|i| (i + 1..n).map(move |j| (i, j)))
            .collect();
        all.shuffle(rng);
        all.truncate(count);
        return all;
    }

    let mut seen = HashSet::with_capacity(count);
    let mut pairs = Vec::with_capacity(count);
    while pairs.len() < count {
        let a = rng.gen_range(0..n);
        let b = rng.gen_range(0..n);
        if a == b {
            continue;
        }
        let pair = (a.min(b), a.max(b));
        if seen.insert(pair) {
            pairs.push(pair);
        }
    }
    pairs
}
