//! Cross-context acquisition delegation for deferred (worker) execution.
//!
//! A worker context cannot invoke the device-media provider directly; it
//! holds a [`RelayProvider`] whose requests travel over a channel to the
//! host, where an [`AcquisitionRelay`] answers them with the real
//! provider. The worker still runs its own grab loop locally.

use tokio::sync::{mpsc, oneshot};
use tracing::debug;

use crate::traits::{CaptureError, MediaConstraints, MediaProvider, MediaStream, Result};

/// One in-flight acquisition request from a worker context.
struct AcquisitionRequest {
    constraints: MediaConstraints,
    reply: oneshot::Sender<Result<Box<dyn MediaStream>>>,
}

/// Host-side end of the acquisition channel.
pub struct AcquisitionRelay {
    requests: mpsc::Receiver<AcquisitionRequest>,
}

impl AcquisitionRelay {
    /// Answer acquisition requests with `provider` until every worker
    /// handle has been dropped.
    pub async fn serve<P: MediaProvider>(mut self, provider: P) {
        while let Some(request) = self.requests.recv().await {
            let outcome = provider.acquire(request.constraints).await;
            if request.reply.send(outcome).is_err() {
                debug!("worker dropped its acquisition reply channel");
            }
        }
        debug!("acquisition relay finished; all worker handles dropped");
    }
}

/// Worker-side media provider delegating to the host application.
#[derive(Clone)]
pub struct RelayProvider {
    requests: mpsc::Sender<AcquisitionRequest>,
}

#[async_trait::async_trait]
impl MediaProvider for RelayProvider {
    async fn acquire(&self, constraints: MediaConstraints) -> Result<Box<dyn MediaStream>> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.requests
            .send(AcquisitionRequest {
                constraints,
                reply: reply_tx,
            })
            .await
            .map_err(|_| {
                CaptureError::AcquisitionFailed("host acquisition channel closed".to_owned())
            })?;
        reply_rx.await.map_err(|_| {
            CaptureError::AcquisitionFailed("host dropped the acquisition request".to_owned())
        })?
    }
}

/// Create a connected relay/provider pair.
#[must_use]
pub fn acquisition_channel(capacity: usize) -> (AcquisitionRelay, RelayProvider) {
    let (tx, rx) = mpsc::channel(capacity);
    (AcquisitionRelay { requests: rx }, RelayProvider { requests: tx })
}
