use anyhow::{Result, anyhow};
use rand::Rng;
use rand_distr::{Binomial, Distribution, Gamma};

/// A Dirichlet distribution over a runtime-sized set of categories.
/// Sampled as independent Gamma(alpha, 1) draws normalized by their
/// sum.
#[derive(Debug, Clone)]
pub struct Dirichlet {
    alphas: Vec<f64>,
}

impl Dirichlet {
    pub fn new(alphas: Vec<f64>) -> Result<Self> {
        if alphas.is_empty() {
            return Err(anyhow!("Dirichlet needs at least one concentration"));
        }
        if alphas.iter().any(|&a| !a.is_finite() || a <= 0.0) {
            return Err(anyhow!(
                "Dirichlet concentrations must be finite and positive: {:?}",
                alphas
            ));
        }
        Ok(Dirichlet { alphas })
    }
}

impl Distribution<Vec<f64>> for Dirichlet {
    fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> Vec<f64> {
        let mut draws: Vec<f64> = self
            .alphas
            .iter()
            .map(|&alpha| match Gamma::new(alpha, 1.0) {
                // alpha was validated positive in new()
                Ok(gamma) => gamma.sample(rng),
                Err(_) => 0.0,
            })
            .collect();
        let total: f64 = draws.iter().sum();
        if total <= 0.0 {
            // All gamma draws underflowed, which only happens for
            // extremely small concentrations. Flat vector keeps the
            // sums-to-one invariant.
            let flat = 1.0 / draws.len() as f64;
            draws.fill(flat);
        } else {
            for d in draws.iter_mut() {
                *d /= total;
            }
        }
        draws
    }
}

/// A Multinomial distribution, sampled by the conditional-binomial
/// decomposition: each category takes a Binomial share of whatever
/// trials remain.
#[derive(Debug, Clone)]
pub struct Multinomial {
    n: u64,
    probs: Vec<f64>,
}

impl Multinomial {
    pub fn new(n: u64, probs: Vec<f64>) -> Result<Self> {
        if probs.is_empty() {
            return Err(anyhow!("Multinomial needs at least one category"));
        }
        if probs.iter().any(|&p| !p.is_finite() || p < 0.0) {
            return Err(anyhow!(
                "Multinomial probabilities must be finite and non-negative: {:?}",
                probs
            ));
        }
        let total: f64 = probs.iter().sum();
        if total <= 0.0 {
            return Err(anyhow!("Multinomial probabilities sum to {}", total));
        }
        // Normalize once so sampling can assume sum == 1.
        let probs = probs.iter().map(|p| p / total).collect();
        Ok(Multinomial { n, probs })
    }
}

impl Distribution<Vec<u64>> for Multinomial {
    fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> Vec<u64> {
        let k = self.probs.len();
        let mut counts = vec![0u64; k];
        let mut remaining_n = self.n;
        let mut remaining_p = 1.0f64;

        for i in 0..k {
            if remaining_n == 0 {
                break;
            }
            if i == k - 1 || remaining_p <= f64::EPSILON {
                // Last category (or exhausted mass) takes the rest,
                // which is what keeps the counts summing to n exactly.
                counts[i] = remaining_n;
                break;
            }
            let p = (self.probs[i] / remaining_p).clamp(0.0, 1.0);
            let draw = match Binomial::new(remaining_n, p) {
                // p is clamped to [0, 1], so this cannot fail
                Ok(binomial) => binomial.sample(rng),
                Err(_) => 0,
            };
            counts[i] = draw;
            remaining_n -= draw;
            remaining_p -= self.probs[i];
        }
        counts
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::create_rng;
    use statrs::statistics::Statistics;

    #[test]
    fn test_dirichlet_sums_to_one() -> Result<()> {
        let mut rng = create_rng(Some("Hello Cruel World"));
        let dirichlet = Dirichlet::new(vec![10_000.0; 98])?;
        let draw = dirichlet.sample(&mut rng);
        assert_eq!(draw.len(), 98);
        assert!((draw.iter().sum::<f64>() - 1.0).abs() < 1e-9);
        assert!(draw.iter().all(|&p| p >= 0.0));
        Ok(())
    }

    #[test]
    fn test_dirichlet_concentration_flattens() -> Result<()> {
        // With a huge pseudocount the draw should hug the uniform
        // vector; with a tiny one it should be spiky.
        let mut rng = create_rng(Some("Hello Cruel World"));
        let flat = Dirichlet::new(vec![100_000.0; 10])?.sample(&mut rng);
        assert!(flat.iter().all(|&p| (p - 0.1).abs() < 0.01));
        let spiky = Dirichlet::new(vec![0.05; 10])?.sample(&mut rng);
        let max = spiky.iter().cloned().fold(0.0f64, f64::max);
        assert!(max > 0.5);
        Ok(())
    }

    #[test]
    fn test_dirichlet_rejects_bad_alphas() {
        assert!(Dirichlet::new(vec![]).is_err());
        assert!(Dirichlet::new(vec![1.0, 0.0]).is_err());
        assert!(Dirichlet::new(vec![1.0, -3.0]).is_err());
    }

    #[test]
    fn test_multinomial_sums_exactly() -> Result<()> {
        let mut rng = create_rng(Some("Hello Cruel World"));
        let multinomial = Multinomial::new(1000, vec![0.5, 0.3, 0.2])?;
        for _ in 0..50 {
            let counts = multinomial.sample(&mut rng);
            assert_eq!(counts.iter().sum::<u64>(), 1000);
        }
        Ok(())
    }

    #[test]
    fn test_multinomial_expectation() -> Result<()> {
        let mut rng = create_rng(Some("Hello Cruel World"));
        let multinomial = Multinomial::new(1000, vec![0.5, 0.3, 0.2])?;
        let first: Vec<f64> = (0..500)
            .map(|_| multinomial.sample(&mut rng)[0] as f64)
            .collect();
        let mean = first.iter().mean();
        // sd of one draw is ~15.8, so the mean of 500 draws sits
        // within ~0.7 of 500 at 1 sigma; 5 is a generous bound
        assert!((mean - 500.0).abs() < 5.0, "mean was {}", mean);
        Ok(())
    }

    #[test]
    fn test_multinomial_normalizes_weights() -> Result<()> {
        let mut rng = create_rng(Some("Hello Cruel World"));
        // Weights summing to 4 are accepted and rescaled.
        let multinomial = Multinomial::new(100, vec![2.0, 2.0])?;
        let counts = multinomial.sample(&mut rng);
        assert_eq!(counts.iter().sum::<u64>(), 100);
        Ok(())
    }

    #[test]
    fn test_multinomial_rejects_bad_weights() {
        assert!(Multinomial::new(10, vec![]).is_err());
        assert!(Multinomial::new(10, vec![0.0, 0.0]).is_err());
        assert!(Multinomial::new(10, vec![0.5, -0.5]).is_err());
    }

    #[test]
    fn test_single_category_takes_everything() -> Result<()> {
        let mut rng = create_rng(Some("Hello Cruel World"));
        let multinomial = Multinomial::new(42, vec![1.0])?;
        assert_eq!(multinomial.sample(&mut rng), vec![42]);
        Ok(())
    }
}
