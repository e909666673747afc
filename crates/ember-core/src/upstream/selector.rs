use rand::Rng;
use std::{cmp::Ordering, collections::HashSet, sync::Arc};

use crate::{
    types::TransportKind,
    upstream::endpoint::{Endpoint, HealthStatus},
};

/// Number of top-ranked candidates that take part in the weighted draw.
pub const SELECTION_POOL_SIZE: usize = 3;

/// Options controlling [`select`].
#[derive(Debug, Clone)]
pub struct SelectOptions {
    /// Endpoint ids that must not be returned.
    pub exclude_ids: HashSet<String>,
    /// Only consider healthy endpoints of the requested kind.
    pub require_healthy: bool,
    /// Rank staked endpoints ahead of everything else.
    pub prefer_staked: bool,
    /// When no endpoint of the requested kind qualifies, fall back to any healthy
    /// endpoint regardless of kind.
    pub allow_cross_kind_fallback: bool,
}

impl Default for SelectOptions {
    fn default() -> Self {
        Self {
            exclude_ids: HashSet::new(),
            require_healthy: true,
            prefer_staked: false,
            allow_cross_kind_fallback: true,
        }
    }
}

impl SelectOptions {
    #[must_use]
    pub fn exclude(mut self, id: impl Into<String>) -> Self {
        self.exclude_ids.insert(id.into());
        self
    }

    #[must_use]
    pub fn prefer_staked(mut self, prefer: bool) -> Self {
        self.prefer_staked = prefer;
        self
    }

    #[must_use]
    pub fn require_healthy(mut self, require: bool) -> Self {
        self.require_healthy = require;
        self
    }

    #[must_use]
    pub fn without_cross_kind_fallback(mut self) -> Self {
        self.allow_cross_kind_fallback = false;
        self
    }
}

/// Borrowed view of one registered endpoint used during selection.
#[derive(Debug, Clone, Copy)]
pub struct Candidate<'a> {
    pub endpoint: &'a Arc<Endpoint>,
    pub health: &'a HealthStatus,
}

/// Picks one endpoint for `kind`.
///
/// 1. Keep endpoints of `kind` that are not excluded (and healthy if required).
/// 2. If none remain, fall back to any healthy, non-excluded endpoint of any kind.
/// 3. Rank by staked first (when preferred), priority descending, then latency
///    ascending with unknown latency last.
/// 4. Draw from the top [`SELECTION_POOL_SIZE`] proportionally to weight.
pub fn select<R: Rng + ?Sized>(
    candidates: &[Candidate<'_>],
    kind: TransportKind,
    options: &SelectOptions,
    rng: &mut R,
) -> Option<Arc<Endpoint>> {
    let not_excluded = |c: &&Candidate<'_>| !options.exclude_ids.contains(&c.endpoint.id);

    let mut pool: Vec<Candidate<'_>> = candidates
        .iter()
        .filter(|c| c.endpoint.transport_kind == kind)
        .filter(not_excluded)
        .filter(|c| !options.require_healthy || c.health.healthy)
        .copied()
        .collect();

    if pool.is_empty() && options.allow_cross_kind_fallback {
        pool = candidates.iter().filter(not_excluded).filter(|c| c.health.healthy).copied().collect();
        if !pool.is_empty() {
            tracing::debug!(kind = %kind, candidates = pool.len(), "falling back to endpoints of other kinds");
        }
    }

    if pool.is_empty() {
        return None;
    }

    pool.sort_by(|a, b| rank(a, b, options.prefer_staked));
    pool.truncate(SELECTION_POOL_SIZE);

    let chosen = weighted_pick(&pool, rng);
    tracing::trace!(kind = %kind, endpoint = %chosen.endpoint.id, pool = pool.len(), "selected endpoint");
    Some(Arc::clone(chosen.endpoint))
}

fn rank(a: &Candidate<'_>, b: &Candidate<'_>, prefer_staked: bool) -> Ordering {
    let staked = if prefer_staked {
        b.endpoint.staked.cmp(&a.endpoint.staked)
    } else {
        Ordering::Equal
    };
    staked
        .then_with(|| b.endpoint.priority.cmp(&a.endpoint.priority))
        .then_with(|| match (a.health.latency_ms, b.health.latency_ms) {
            (Some(x), Some(y)) => x.cmp(&y),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        })
}

fn weighted_pick<'p, 'a, R: Rng + ?Sized>(
    pool: &'p [Candidate<'a>],
    rng: &mut R,
) -> &'p Candidate<'a> {
    let first = &pool[0];
    if pool.len() == 1 {
        return first;
    }

    let total: f64 = pool.iter().map(|c| f64::from(c.endpoint.weight)).sum();
    if total <= 0.0 {
        return first;
    }

    let mut remaining = rng.random_range(0.0..total);
    for candidate in pool {
        remaining -= f64::from(candidate.endpoint.weight);
        if remaining <= 0.0 {
            return candidate;
        }
    }
    first
}
