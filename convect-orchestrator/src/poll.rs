use convect_common::{ProvisionError, ResourceKind};
use std::future::Future;
use std::time::Duration;
use tokio::sync::watch;

/// Bounded polling policy. Attempt n sleeps `base_interval * n` before the
/// next probe, so the default walks 5s, 10s, 15s, 20s.
#[derive(Debug, Clone)]
pub struct PollConfig {
    pub max_attempts: u32,
    pub base_interval: Duration,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_interval: Duration::from_secs(5),
        }
    }
}

/// What a single status probe observed on the remote side.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome {
    Ready,
    Pending(String),
    /// Remote reached its error state; the message is reported verbatim.
    Faulted(String),
}

/// Drive a remote resource to readiness with a bounded number of probes.
///
/// Cancellation is only honored between attempts: a probe already in
/// flight runs to completion, the check happens at the top of each loop.
pub async fn converge<F, Fut>(
    kind: ResourceKind,
    cfg: &PollConfig,
    cancel: &watch::Receiver<bool>,
    mut probe: F,
) -> Result<(), ProvisionError>
where
    F: FnMut() -> Fut + Send,
    Fut: Future<Output = Result<PollOutcome, ProvisionError>> + Send,
{
    let mut last_status = String::from("UNKNOWN");

    for attempt in 1..=cfg.max_attempts {
        if *cancel.borrow() {
            return Err(ProvisionError::Cancelled { kind });
        }

        match probe().await? {
            PollOutcome::Ready => return Ok(()),
            PollOutcome::Faulted(message) => {
                return Err(ProvisionError::RemoteFault { kind, message });
            }
            PollOutcome::Pending(status) => {
                println!(
                    "⏳ [Poller] {} still '{}' (attempt {}/{})",
                    kind, status, attempt, cfg.max_attempts
                );
                last_status = status;
            }
        }

        if attempt < cfg.max_attempts {
            tokio::time::sleep(cfg.base_interval * attempt).await;
        }
    }

    Err(ProvisionError::ConvergenceTimeout {
        kind,
        last_status,
        attempts: cfg.max_attempts,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    fn fast() -> PollConfig {
        PollConfig {
            max_attempts: 5,
            base_interval: Duration::ZERO,
        }
    }

    fn scripted(
        outcomes: Vec<PollOutcome>,
    ) -> (
        Arc<AtomicUsize>,
        impl FnMut() -> std::pin::Pin<
            Box<dyn Future<Output = Result<PollOutcome, ProvisionError>> + Send>,
        >,
    ) {
        let script = Arc::new(Mutex::new(VecDeque::from(outcomes)));
        let calls = Arc::new(AtomicUsize::new(0));
        let probe_calls = calls.clone();
        let probe = move || {
            let script = script.clone();
            let calls = probe_calls.clone();
            Box::pin(async move {
                calls.fetch_add(1, Ordering::SeqCst);
                let next = script
                    .lock()
                    .unwrap()
                    .pop_front()
                    .unwrap_or(PollOutcome::Pending("PENDING".to_string()));
                Ok(next)
            })
                as std::pin::Pin<
                    Box<dyn Future<Output = Result<PollOutcome, ProvisionError>> + Send>,
                >
        };
        (calls, probe)
    }

    #[tokio::test]
    async fn ready_on_first_probe_stops_immediately() {
        let (calls, probe) = scripted(vec![PollOutcome::Ready]);
        let (_tx, rx) = watch::channel(false);

        converge(ResourceKind::Instance, &fast(), &rx, probe)
            .await
            .unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn pending_then_ready_takes_exactly_two_probes() {
        let (calls, probe) = scripted(vec![
            PollOutcome::Pending("PENDING".to_string()),
            PollOutcome::Ready,
        ]);
        let (_tx, rx) = watch::channel(false);

        converge(ResourceKind::Instance, &fast(), &rx, probe)
            .await
            .unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn fault_short_circuits_with_verbatim_message() {
        let (calls, probe) = scripted(vec![
            PollOutcome::Pending("BUILD".to_string()),
            PollOutcome::Faulted("No valid host was found".to_string()),
        ]);
        let (_tx, rx) = watch::channel(false);

        let err = converge(ResourceKind::Instance, &fast(), &rx, probe)
            .await
            .unwrap_err();
        match err {
            ProvisionError::RemoteFault { kind, message } => {
                assert_eq!(kind, ResourceKind::Instance);
                assert_eq!(message, "No valid host was found");
            }
            other => panic!("expected RemoteFault, got {other:?}"),
        }
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn exhausting_attempts_times_out_with_last_status() {
        let (calls, probe) = scripted(vec![]);
        let (_tx, rx) = watch::channel(false);

        let err = converge(ResourceKind::Volume, &fast(), &rx, probe)
            .await
            .unwrap_err();
        match err {
            ProvisionError::ConvergenceTimeout {
                kind,
                last_status,
                attempts,
            } => {
                assert_eq!(kind, ResourceKind::Volume);
                assert_eq!(last_status, "PENDING");
                assert_eq!(attempts, 5);
            }
            other => panic!("expected ConvergenceTimeout, got {other:?}"),
        }
        assert_eq!(calls.load(Ordering::SeqCst), 5);
    }

    #[tokio::test]
    async fn cancellation_is_seen_before_the_first_probe() {
        let (calls, probe) = scripted(vec![PollOutcome::Ready]);
        let (tx, rx) = watch::channel(false);
        tx.send(true).unwrap();

        let err = converge(ResourceKind::Instance, &fast(), &rx, probe)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ProvisionError::Cancelled {
                kind: ResourceKind::Instance
            }
        ));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn cancellation_mid_run_is_honored_between_attempts() {
        let (tx, rx) = watch::channel(false);
        let tx = Arc::new(tx);
        let calls = Arc::new(AtomicUsize::new(0));

        let probe_tx = tx.clone();
        let probe_calls = calls.clone();
        let probe = move || {
            let tx = probe_tx.clone();
            let calls = probe_calls.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                // Request cancellation while this probe is in flight.
                tx.send(true).ok();
                Ok(PollOutcome::Pending("BUILD".to_string()))
            }
        };

        let err = converge(ResourceKind::Instance, &fast(), &rx, probe)
            .await
            .unwrap_err();
        assert!(matches!(err, ProvisionError::Cancelled { .. }));
        // First probe ran to completion; the second never started.
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn backoff_grows_linearly_with_attempt_number() {
        let cfg = PollConfig {
            max_attempts: 3,
            base_interval: Duration::from_secs(5),
        };
        let (_tx, rx) = watch::channel(false);
        let probe = || async { Ok(PollOutcome::Pending("BUILD".to_string())) };

        let started = tokio::time::Instant::now();
        let err = converge(ResourceKind::Instance, &cfg, &rx, probe)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ProvisionError::ConvergenceTimeout { attempts: 3, .. }
        ));
        // Sleeps after attempts 1 and 2: 5s + 10s. No sleep after the last.
        assert_eq!(started.elapsed(), Duration::from_secs(15));
    }
}
