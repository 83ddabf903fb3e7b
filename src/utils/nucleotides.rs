use anyhow::{Result, anyhow};
#[cfg(test)]
use rand::Rng;

/// Enum for DNA nucleotides.
#[derive(Debug, Clone, Eq, PartialEq, Copy, Hash)]
pub enum Nuc {
    A,
    C,
    G,
    T,
    N,
}

/// Convert a base character to a nucleotide.
pub fn base_to_nuc(base: char) -> Result<Nuc> {
    match base {
        'A' | 'a' => Ok(Nuc::A),
        'C' | 'c' => Ok(Nuc::C),
        'G' | 'g' => Ok(Nuc::G),
        'T' | 't' => Ok(Nuc::T),
        'N' | 'n' => Ok(Nuc::N),
        _ => Err(anyhow!("Invalid base: {:?}", base)),
    }
}

/// Convert a nucleotide to a base character.
pub fn nuc_to_base(nuc: Nuc) -> char {
    match nuc {
        Nuc::A => 'A',
        Nuc::C => 'C',
        Nuc::G => 'G',
        Nuc::T => 'T',
        Nuc::N => 'N',
    }
}

/// Generate a random sequence of nucleotides, used to build test
/// fixtures.
#[cfg(test)]
pub fn random_seq<R: Rng>(rng: &mut R, length: usize) -> Vec<Nuc> {
    (0..length)
        .map(|_| match rng.random_range(0..4) {
            0 => Nuc::A,
            1 => Nuc::C,
            2 => Nuc::G,
            _ => Nuc::T,
        })
        .collect()
}
