//! Birkhoff (ranked) secret sharing
//!
//! A party holding a [`BkParameter`] `(x, r)` owns `f^(r)(x)`, the `r`-th
//! derivative of the shared polynomial evaluated at its coordinate. Rank 0
//! everywhere is plain Shamir sharing and the coefficients computed here are
//! then exactly the Lagrange coefficients at zero.
//!
//! All arithmetic happens in the prime field `F`, so the field order of the
//! scheme is the modulus of `F` (the group order when `F` is a curve scalar).

use crate::{Error, Result};
use elliptic_curve::ff::PrimeField;
use std::collections::HashSet;
use tracing::debug;

/// Smallest threshold a scheme may use
pub const MIN_THRESHOLD: usize = 2;

/// A party's position in the ranked sharing scheme
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BkParameter<F> {
    x: F,
    rank: u32,
}

impl<F: PrimeField> BkParameter<F> {
    pub fn new(x: F, rank: u32) -> Self {
        Self { x, rank }
    }

    /// Evaluation coordinate
    pub fn x(&self) -> F {
        self.x
    }

    /// Derivative order
    pub fn rank(&self) -> u32 {
        self.rank
    }

    /// Row of the Birkhoff matrix with `threshold` columns
    ///
    /// Column `j` holds the factor of the coefficient `a_j` in
    /// `f^(rank)(x)`, i.e. `j!/(j-rank)! * x^(j-rank)` for `j >= rank`.
    pub fn row(&self, threshold: usize) -> Vec<F> {
        let rank = self.rank as usize;
        let mut row = vec![F::ZERO; threshold];
        let mut x_power = F::ONE;

        for (j, entry) in row.iter_mut().enumerate().skip(rank) {
            *entry = falling_factorial::<F>(j, rank) * x_power;
            x_power *= self.x;
        }

        row
    }

    /// Evaluate the `rank`-th derivative of the polynomial at `x`
    pub fn evaluate(&self, coefficients: &[F]) -> F {
        self.row(coefficients.len())
            .iter()
            .zip(coefficients)
            .fold(F::ZERO, |acc, (factor, coef)| acc + *factor * *coef)
    }
}

/// `n! / (n-k)!`
fn falling_factorial<F: PrimeField>(n: usize, k: usize) -> F {
    ((n - k + 1)..=n).fold(F::ONE, |acc, i| acc * F::from(i as u64))
}

/// Check that `threshold` is usable with `n` parties
pub fn ensure_threshold(threshold: usize, n: usize) -> Result<()> {
    if threshold < MIN_THRESHOLD {
        return Err(Error::InvalidThreshold(threshold));
    }
    if threshold > n {
        return Err(Error::ThresholdNotMet {
            required: threshold,
            actual: n,
        });
    }
    Ok(())
}

/// Ordered BK parameters, positionally aligned with a share collection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BkParameters<F>(Vec<BkParameter<F>>);

impl<F> From<Vec<BkParameter<F>>> for BkParameters<F> {
    fn from(params: Vec<BkParameter<F>>) -> Self {
        Self(params)
    }
}

impl<F> FromIterator<BkParameter<F>> for BkParameters<F> {
    fn from_iter<I: IntoIterator<Item = BkParameter<F>>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl<F: PrimeField> BkParameters<F> {
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &BkParameter<F>> {
        self.0.iter()
    }

    pub fn as_slice(&self) -> &[BkParameter<F>] {
        &self.0
    }

    /// The `len x threshold` Birkhoff matrix
    fn matrix(&self, threshold: usize) -> Vec<Vec<F>> {
        self.0.iter().map(|bk| bk.row(threshold)).collect()
    }

    /// Check that these parameters can reconstruct a degree `threshold - 1`
    /// polynomial's constant term
    pub fn check_valid(&self, threshold: usize) -> Result<()> {
        ensure_threshold(threshold, self.len())?;

        let mut seen = HashSet::with_capacity(self.len());
        for bk in &self.0 {
            if !seen.insert(bk.x.to_repr().as_ref().to_vec()) {
                return Err(Error::DuplicateCoordinate);
            }
        }

        // After sorting, the i-th party may carry at most i derivatives.
        let mut ranks: Vec<u32> = self.0.iter().map(|bk| bk.rank).collect();
        ranks.sort_unstable();
        if let Some((i, rank)) = ranks
            .iter()
            .enumerate()
            .find(|(i, rank)| **rank as usize > *i)
        {
            return Err(Error::SingularScheme(format!(
                "rank {} at sorted position {}",
                rank, i
            )));
        }

        let mut matrix = self.matrix(threshold);
        let rank = row_reduce(&mut matrix, threshold).len();
        if rank != threshold {
            return Err(Error::SingularScheme(format!(
                "matrix rank {} below threshold {}",
                rank, threshold
            )));
        }

        Ok(())
    }

    /// Compute one coefficient per party such that
    /// `secret = sum(coefficient_i * share_i)`
    pub fn compute_coefficients(&self, threshold: usize) -> Result<Vec<F>> {
        self.check_valid(threshold)?;

        let n = self.len();
        let matrix = self.matrix(threshold);

        // Solve A^T c = e_0 as a threshold x (n + 1) augmented system.
        let mut system: Vec<Vec<F>> = (0..threshold)
            .map(|j| {
                let mut equation: Vec<F> = matrix.iter().map(|row| row[j]).collect();
                equation.push(if j == 0 { F::ONE } else { F::ZERO });
                equation
            })
            .collect();

        let pivots = row_reduce(&mut system, n);
        if system
            .iter()
            .skip(pivots.len())
            .any(|equation| !bool::from(equation[n].is_zero()))
        {
            return Err(Error::SingularScheme("inconsistent system".into()));
        }

        let mut coefficients = vec![F::ZERO; n];
        for (row, col) in pivots.iter().enumerate() {
            coefficients[*col] = system[row][n];
        }

        debug!(parties = n, threshold, "Computed BK coefficients");
        Ok(coefficients)
    }

    fn ensure_aligned(&self, shares: &[F]) -> Result<()> {
        if shares.len() != self.len() {
            return Err(Error::InvalidConfig(format!(
                "{} shares for {} BK parameters",
                shares.len(),
                self.len()
            )));
        }
        Ok(())
    }

    /// Combine aligned shares into the shared secret
    pub fn reconstruct(&self, shares: &[F], threshold: usize) -> Result<F> {
        self.ensure_aligned(shares)?;

        let coefficients = self.compute_coefficients(threshold)?;
        Ok(coefficients
            .iter()
            .zip(shares)
            .fold(F::ZERO, |acc, (coef, share)| acc + *coef * *share))
    }

    /// Recover every coefficient of the shared polynomial
    ///
    /// Unlike [`reconstruct`](Self::reconstruct) this uses all shares, so it
    /// fails when any share is off the degree `threshold - 1` polynomial the
    /// others describe.
    pub fn interpolate(&self, shares: &[F], threshold: usize) -> Result<Vec<F>> {
        self.ensure_aligned(shares)?;
        self.check_valid(threshold)?;

        let mut system: Vec<Vec<F>> = self
            .0
            .iter()
            .zip(shares)
            .map(|(bk, share)| {
                let mut equation = bk.row(threshold);
                equation.push(*share);
                equation
            })
            .collect();

        // Full column rank, so the pivots are exactly 0..threshold.
        let pivots = row_reduce(&mut system, threshold);
        if system
            .iter()
            .skip(pivots.len())
            .any(|equation| !bool::from(equation[threshold].is_zero()))
        {
            return Err(Error::VerificationFailed(
                "shares do not lie on a single polynomial".into(),
            ));
        }

        Ok(system
            .iter()
            .take(threshold)
            .map(|equation| equation[threshold])
            .collect())
    }
}

/// Bring the first `cols` columns of `m` into reduced row echelon form and
/// return the pivot columns
fn row_reduce<F: PrimeField>(m: &mut [Vec<F>], cols: usize) -> Vec<usize> {
    let mut pivots = Vec::new();
    let mut row = 0;

    for col in 0..cols {
        if row == m.len() {
            break;
        }
        let Some(found) = (row..m.len()).find(|&r| !bool::from(m[r][col].is_zero())) else {
            continue;
        };
        m.swap(row, found);

        let inv = m[row][col].invert().unwrap_or(F::ZERO);
        for v in m[row].iter_mut() {
            *v *= inv;
        }

        let pivot_row = m[row].clone();
        for (r, other) in m.iter_mut().enumerate() {
            let factor = other[col];
            if r == row || bool::from(factor.is_zero()) {
                continue;
            }
            for (v, p) in other.iter_mut().zip(&pivot_row) {
                *v -= factor * *p;
            }
        }

        pivots.push(col);
        row += 1;
    }

    pivots
}
