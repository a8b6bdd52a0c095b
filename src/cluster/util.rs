use rand::Rng;

#[inline]
pub(crate) fn squared_euclidean(a: &[f64], b: &[f64]) -> f64 {
    debug_assert_eq!(a.len(), b.len());
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| {
            let d = x - y;
            d * d
        })
        .sum()
}

/// Index of the smallest value; ties resolve to the first occurrence.
///
/// NaN never wins against a finite value. Returns 0 for an empty slice.
#[inline]
pub(crate) fn argmin_first(values: &[f64]) -> usize {
    let mut best = 0;
    let mut best_val = f64::INFINITY;
    for (j, &v) in values.iter().enumerate() {
        if v < best_val {
            best_val = v;
            best = j;
        }
    }
    best
}

/// Outcome of one draw from an (unnormalized) mass over indices.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Draw {
    /// Drawn proportionally to the mass.
    Weighted(usize),
    /// The mass over eligible indices was zero (or not finite): drawn uniformly.
    Uniform(usize),
}

impl Draw {
    pub(crate) fn index(self) -> usize {
        match self {
            Draw::Weighted(i) | Draw::Uniform(i) => i,
        }
    }
}

/// Draw one index with probability `mass[i] / Σ mass`, skipping `taken` indices.
///
/// Negative or non-finite entries count as zero. When nothing eligible carries
/// mass, falls back to a uniform draw over the indices not yet taken.
/// Returns `None` only when every index is taken.
pub(crate) fn draw_index<R: Rng + ?Sized>(
    rng: &mut R,
    mass: &[f64],
    taken: &[bool],
) -> Option<Draw> {
    debug_assert_eq!(mass.len(), taken.len());

    let eligible = |i: usize| -> f64 {
        let m = mass[i];
        if taken[i] || !m.is_finite() || m <= 0.0 {
            0.0
        } else {
            m
        }
    };

    let total: f64 = (0..mass.len()).map(eligible).sum();
    if total > 0.0 && total.is_finite() {
        let target = rng.random::<f64>() * total;
        let mut acc = 0.0;
        let mut last = None;
        for i in 0..mass.len() {
            let m = eligible(i);
            if m == 0.0 {
                continue;
            }
            acc += m;
            last = Some(i);
            if target < acc {
                return Some(Draw::Weighted(i));
            }
        }
        // Rounding can leave `target` just past the final partial sum.
        return last.map(Draw::Weighted);
    }

    let free: Vec<usize> = (0..taken.len()).filter(|&i| !taken[i]).collect();
    if free.is_empty() {
        return None;
    }
    let pick = rng.random_range(0..free.len());
    Some(Draw::Uniform(free[pick]))
}
