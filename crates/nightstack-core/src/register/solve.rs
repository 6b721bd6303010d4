//! Rigid-transform solving between a candidate star list and the reference.
//!
//! Matching uses pairwise-distance voting among the brightest stars:
//! rotation and translation preserve inter-star distances, so a candidate
//! star and a reference star that agree on many distances to their
//! respective neighbours are very likely the same star. The voted pairs
//! are then fed to a 2-D rigid least-squares fit.

use serde::{Deserialize, Serialize};

use crate::consts::{MATCH_DISTANCE_TOLERANCE, MIN_TRANSFORM_MATCHES, SOLVER_STAR_LIMIT};
use crate::register::detect::{Star, StarList};

/// Rigid mapping from a frame's pixel coordinates onto the reference grid:
/// rotate by `angle_degrees` about the origin, then translate by (dx, dy).
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Transform {
    pub dx: f64,
    pub dy: f64,
    pub angle_degrees: f64,
}

impl Transform {
    /// The identity transform marks the reference frame itself.
    pub fn identity() -> Self {
        Self {
            dx: 0.0,
            dy: 0.0,
            angle_degrees: 0.0,
        }
    }

    pub fn is_identity(&self) -> bool {
        self.dx == 0.0 && self.dy == 0.0 && self.angle_degrees == 0.0
    }

    /// Frame coordinates -> reference coordinates.
    pub fn apply(&self, x: f64, y: f64) -> (f64, f64) {
        let t = self.angle_degrees.to_radians();
        let (sin, cos) = t.sin_cos();
        (x * cos - y * sin + self.dx, x * sin + y * cos + self.dy)
    }

    /// Reference coordinates -> frame coordinates.
    pub fn apply_inverse(&self, x: f64, y: f64) -> (f64, f64) {
        let t = self.angle_degrees.to_radians();
        let (sin, cos) = t.sin_cos();
        let tx = x - self.dx;
        let ty = y - self.dy;
        (tx * cos + ty * sin, -tx * sin + ty * cos)
    }
}

impl Default for Transform {
    fn default() -> Self {
        Self::identity()
    }
}

/// Solve the rigid transform mapping `candidate` onto `reference`.
/// Returns `None` when fewer than [`MIN_TRANSFORM_MATCHES`] consistent
/// star pairs survive the fit.
pub fn solve_transform(candidate: &StarList, reference: &StarList) -> Option<Transform> {
    let cand = brightest(&candidate.stars, SOLVER_STAR_LIMIT);
    let refs = brightest(&reference.stars, SOLVER_STAR_LIMIT);
    if cand.len() < MIN_TRANSFORM_MATCHES || refs.len() < MIN_TRANSFORM_MATCHES {
        return None;
    }

    let matches = vote_matches(&cand, &refs);
    if matches.len() < MIN_TRANSFORM_MATCHES {
        return None;
    }

    let pairs: Vec<((f64, f64), (f64, f64))> = matches
        .iter()
        .map(|&(ci, ri)| ((cand[ci].x, cand[ci].y), (refs[ri].x, refs[ri].y)))
        .collect();

    let first = fit_rigid(&pairs)?;

    // One residual-trimmed refit.
    let kept: Vec<((f64, f64), (f64, f64))> = pairs
        .into_iter()
        .filter(|&((cx, cy), (rx, ry))| {
            let (px, py) = first.apply(cx, cy);
            let dx = px - rx;
            let dy = py - ry;
            (dx * dx + dy * dy).sqrt() <= MATCH_DISTANCE_TOLERANCE
        })
        .collect();
    if kept.len() < MIN_TRANSFORM_MATCHES {
        return None;
    }
    fit_rigid(&kept)
}

fn brightest(stars: &[Star], limit: usize) -> Vec<Star> {
    // Star lists are already flux-ordered.
    stars.iter().take(limit).cloned().collect()
}

/// Vote on candidate/reference pairings by pairwise-distance agreement.
fn vote_matches(cand: &[Star], refs: &[Star]) -> Vec<(usize, usize)> {
    let nc = cand.len();
    let nr = refs.len();
    let mut votes = vec![vec![0u32; nr]; nc];

    for i in 0..nc {
        for j in 0..nc {
            if i == j {
                continue;
            }
            let dc = distance(&cand[i], &cand[j]);
            for k in 0..nr {
                for l in 0..nr {
                    if k == l {
                        continue;
                    }
                    let dr = distance(&refs[k], &refs[l]);
                    if (dc - dr).abs() <= MATCH_DISTANCE_TOLERANCE {
                        votes[i][k] += 1;
                        break;
                    }
                }
            }
        }
    }

    // Greedy assignment by descending vote count, one-to-one.
    let min_votes = (MIN_TRANSFORM_MATCHES as u32).max(2);
    let mut scored: Vec<(u32, usize, usize)> = Vec::new();
    for (i, row) in votes.iter().enumerate() {
        for (k, &v) in row.iter().enumerate() {
            if v >= min_votes {
                scored.push((v, i, k));
            }
        }
    }
    scored.sort_by(|a, b| b.0.cmp(&a.0));

    let mut used_c = vec![false; nc];
    let mut used_r = vec![false; nr];
    let mut matches = Vec::new();
    for (_, i, k) in scored {
        if !used_c[i] && !used_r[k] {
            used_c[i] = true;
            used_r[k] = true;
            matches.push((i, k));
        }
    }
    matches
}

fn distance(a: &Star, b: &Star) -> f64 {
    let dx = a.x - b.x;
    let dy = a.y - b.y;
    (dx * dx + dy * dy).sqrt()
}

/// Least-squares rigid fit (2-D Kabsch): centroids, cross-covariance angle,
/// translation from the rotated candidate centroid.
fn fit_rigid(pairs: &[((f64, f64), (f64, f64))]) -> Option<Transform> {
    let n = pairs.len() as f64;
    if pairs.is_empty() {
        return None;
    }

    let (mut ccx, mut ccy, mut rcx, mut rcy) = (0.0, 0.0, 0.0, 0.0);
    for &((cx, cy), (rx, ry)) in pairs {
        ccx += cx;
        ccy += cy;
        rcx += rx;
        rcy += ry;
    }
    ccx /= n;
    ccy /= n;
    rcx /= n;
    rcy /= n;

    let mut sxx = 0.0;
    let mut sxy = 0.0;
    for &((cx, cy), (rx, ry)) in pairs {
        let ax = cx - ccx;
        let ay = cy - ccy;
        let bx = rx - rcx;
        let by = ry - rcy;
        sxx += ax * bx + ay * by;
        sxy += ax * by - ay * bx;
    }

    let angle = sxy.atan2(sxx);
    let (sin, cos) = angle.sin_cos();
    let dx = rcx - (ccx * cos - ccy * sin);
    let dy = rcy - (ccx * sin + ccy * cos);

    Some(Transform {
        dx,
        dy,
        angle_degrees: angle.to_degrees(),
    })
}
