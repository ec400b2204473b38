use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Which trainable unit a tick optimizes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Generator,
    Discriminator,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Generator => write!(f, "generator"),
            Role::Discriminator => write!(f, "discriminator"),
        }
    }
}

/// Deterministic generator/discriminator alternation.
///
/// The global iteration counter is cut into windows of `g_iters + d_iters`
/// ticks: the first `g_iters` of each window train the generator, the rest
/// the discriminator. Depends only on the counter, so a resumed run makes the
/// same decisions it would have made uninterrupted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AlternationScheduler {
    adversarial: bool,
    g_iters: u64,
    d_iters: u64,
}

impl AlternationScheduler {
    pub fn new(adversarial: bool, g_iters: u64, d_iters: u64) -> Result<Self> {
        match g_iters.checked_add(d_iters) {
            None => return Err(Error::config("g_iters + d_iters overflows")),
            Some(0) if adversarial => {
                return Err(Error::config("g_iters + d_iters must be positive when adversarial training is enabled"))
            }
            Some(_) => {}
        }
        Ok(AlternationScheduler { adversarial, g_iters, d_iters })
    }

    pub fn decide(&self, global_iteration: u64) -> Role {
        if !self.adversarial || global_iteration % (self.g_iters + self.d_iters) < self.g_iters {
            Role::Generator
        } else {
            Role::Discriminator
        }
    }
}
