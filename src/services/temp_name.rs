use crate::error::UploadError;
use rand::rngs::StdRng;
use rand::{RngCore, SeedableRng};
use std::path::Path;
use tokio::sync::Mutex;

pub const ALPHABET: &[u8; 62] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789";

pub const TEMP_NAME_LEN: usize = 5;

/// Collisions tolerated before allocation gives up.
pub const MAX_ATTEMPTS: u32 = 3;

pub fn random_name<R: RngCore + ?Sized>(rng: &mut R, length: usize) -> String {
    (0..length)
        .map(|_| {
            let index = rng.next_u32() as usize % ALPHABET.len();
            ALPHABET[index] as char
        })
        .collect()
}

/// Hands out short random names that are free in a staging directory.
///
/// The random source only has to avoid collisions within a request's
/// lifetime, so it is not required to be cryptographically strong. It is
/// injected so tests can replay a fixed sequence of names.
pub struct TempNameAllocator {
    rng: Mutex<Box<dyn RngCore + Send>>,
}

impl TempNameAllocator {
    pub fn new(rng: impl RngCore + Send + 'static) -> Self {
        Self {
            rng: Mutex::new(Box::new(rng)),
        }
    }

    pub fn from_entropy() -> Self {
        Self::new(StdRng::from_entropy())
    }

    pub async fn allocate(&self, staging_dir: &Path) -> Result<String, UploadError> {
        let mut attempts = 0;

        loop {
            let name = {
                let mut rng = self.rng.lock().await;
                random_name(rng.as_mut(), TEMP_NAME_LEN)
            };
            attempts += 1;

            let candidate = staging_dir.join(&name);
            let exists = tokio::fs::try_exists(&candidate)
                .await
                .map_err(|e| UploadError::filesystem("exists", &candidate, e))?;

            if !exists {
                tracing::debug!("Allocated temp name {} after {} attempt(s)", name, attempts);
                return Ok(name);
            }

            tracing::debug!(
                "Temp name {} is taken in {} (attempt {}/{})",
                name,
                staging_dir.display(),
                attempts,
                MAX_ATTEMPTS
            );

            if attempts >= MAX_ATTEMPTS {
                return Err(UploadError::AllocationExhausted { attempts });
            }
        }
    }
}

impl Default for TempNameAllocator {
    fn default() -> Self {
        Self::from_entropy()
    }
}

impl std::fmt::Debug for TempNameAllocator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TempNameAllocator").finish_non_exhaustive()
    }
}
