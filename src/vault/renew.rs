use crate::{cli::globals::GlobalArgs, vault};
use rand::{Rng, SeedableRng, rngs::StdRng};
use secrecy::SecretString;
use tokio::{
    sync::mpsc,
    time::{Duration, sleep},
};
use tracing::{debug, error, instrument, warn};

const RENEW_ATTEMPTS: u32 = 3;

/// Lease fraction (percent) to wait before the next renewal.
fn jittered(lease_duration: u64, rng: &mut StdRng) -> Duration {
    let factor = rng.gen_range(70..90);
    Duration::from_secs(lease_duration * factor / 100)
}

/// Try to renew once, backing off between attempts.
/// Returns the new lease duration, or `None` after the last failed attempt.
async fn renew_with_backoff(url: &str, token: &SecretString) -> Option<u64> {
    for attempt in 1..=RENEW_ATTEMPTS {
        if attempt > 1 {
            let backoff_time = 2u64.pow(attempt - 1);
            warn!("Backing off for {} seconds", backoff_time);
            sleep(Duration::from_secs(backoff_time)).await;
        }

        match vault::renew_token(url, token, None).await {
            Ok(lease_duration) => return Some(lease_duration),
            Err(e) => {
                error!("Failed to renew token: {}", e);
            }
        }
    }

    None
}

/// Keep the Vault token alive in the background.
///
/// Sends on `tx` (asking the server to shut down) once renewal has failed
/// `RENEW_ATTEMPTS` times in a row.
#[instrument(skip(globals, tx))]
pub fn try_renew(globals: &GlobalArgs, tx: mpsc::UnboundedSender<()>) {
    let url = globals.vault_url.clone();
    let token = globals.vault_token.clone();

    tokio::spawn(async move {
        let mut rng = StdRng::from_entropy();

        loop {
            let Some(lease_duration) = renew_with_backoff(&url, &token).await else {
                error!("Failed to renew token after {RENEW_ATTEMPTS} attempts");
                let _ = tx.send(());
                return;
            };

            let wait = jittered(lease_duration, &mut rng);
            debug!("Will renew token in {} seconds", wait.as_secs());
            sleep(wait).await;
        }
    });
}
