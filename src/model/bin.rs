//! Bin entity and factory.

use crate::model::random::{random_color, random_string, solid_gif_data_uri};
use crate::model::unix_now;
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

/// Length of a generated bin name.
pub const BIN_NAME_LENGTH: usize = 6;

/// Length of the secret key given to private bins.
pub const SECRET_KEY_LENGTH: usize = 32;

/// A named, time-bounded collection of captured requests.
///
/// `request_count` and `updated` are maintained by the storage engine on
/// every request insertion. `secret_key` is only set for private bins and is
/// never inspected by the storage engine itself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bin {
    /// Short random name, also the storage key
    pub name: String,
    /// Creation time (unix seconds)
    pub created: i64,
    /// Time of the last update or request insertion (unix seconds)
    pub updated: i64,
    /// Number of requests currently retained
    pub request_count: usize,
    /// Presentation color
    pub color: [u8; 3],
    /// Icon derived from `color`, as a data URI
    pub favicon: String,
    /// Whether access requires `secret_key`
    pub private: bool,
    /// Access token for private bins
    pub secret_key: Option<String>,
}

impl Bin {
    /// Returns true if the bin has not been updated within `lifetime` seconds
    /// as of `now`. A non-positive lifetime never expires.
    pub fn is_expired(&self, lifetime: i64, now: i64) -> bool {
        lifetime > 0 && self.updated < now - lifetime
    }
}

/// Creates bins using an injected random generator.
///
/// # Example
///
/// ```
/// use skimmer::model::BinFactory;
/// use rand::rngs::StdRng;
/// use rand::SeedableRng;
///
/// let mut factory = BinFactory::new(StdRng::seed_from_u64(1));
/// let bin = factory.create();
/// assert_eq!(bin.name.len(), 6);
/// assert!(!bin.private);
/// ```
#[derive(Debug)]
pub struct BinFactory<R> {
    rng: R,
}

impl BinFactory<SmallRng> {
    /// Creates a factory seeded from OS entropy.
    pub fn from_entropy() -> Self {
        Self::new(SmallRng::from_entropy())
    }
}

impl<R: Rng> BinFactory<R> {
    /// Creates a factory drawing from `rng`.
    pub fn new(rng: R) -> Self {
        Self { rng }
    }

    /// Creates a public bin.
    pub fn create(&mut self) -> Bin {
        self.build(false)
    }

    /// Creates a private bin with a fresh secret key.
    pub fn create_private(&mut self) -> Bin {
        self.build(true)
    }

    fn build(&mut self, private: bool) -> Bin {
        let now = unix_now();
        let color = random_color(&mut self.rng);
        let name = random_string(&mut self.rng, BIN_NAME_LENGTH);
        let secret_key = private.then(|| random_string(&mut self.rng, SECRET_KEY_LENGTH));

        Bin {
            name,
            created: now,
            updated: now,
            request_count: 0,
            color,
            favicon: solid_gif_data_uri(color),
            private,
            secret_key,
        }
    }
}
