use super::BackendError;
use std::future::Future;
use tracing::{info, warn};

/// Tries each candidate model once, in catalog order, and returns the first
/// non-empty text.
pub async fn try_models<F, Fut>(models: &[String], mut attempt: F) -> Result<String, BackendError>
where
    F: FnMut(String) -> Fut,
    Fut: Future<Output = Result<String, BackendError>>,
{
    if models.is_empty() {
        return Err(BackendError::NoModels);
    }

    for (index, model) in models.iter().enumerate() {
        match attempt(model.clone()).await {
            Ok(text) if !text.trim().is_empty() => {
                info!(
                    "Failover: model {} answered (candidate {}/{})",
                    model,
                    index + 1,
                    models.len()
                );
                return Ok(text);
            }
            Ok(_) => warn!("Failover: model {} returned empty text", model),
            Err(e) => warn!("Failover: model {} failed: {}", model, e),
        }
    }

    Err(BackendError::Exhausted {
        attempts: models.len(),
    })
}
