//! Time left for the AI calls of one stage attempt.

use std::time::Duration;

use tokio::time::Instant;

use crate::ai::{AiClient, AiError, AiRequest, AiResponse};

const MAX_MARGIN: Duration = Duration::from_secs(5);

/// Deadline for AI calls, set a little short of the stage timeout so the
/// worker still has time to settle the stage once a call gives up.
#[derive(Debug, Clone, Copy)]
pub(crate) struct CallBudget {
    deadline: Instant,
}

impl CallBudget {
    pub fn new(stage_timeout: Duration) -> Self {
        let margin = (stage_timeout / 10).min(MAX_MARGIN);
        Self {
            deadline: Instant::now() + stage_timeout.saturating_sub(margin),
        }
    }

    pub fn remaining(&self) -> Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }

    pub fn is_spent(&self) -> bool {
        self.remaining().is_zero()
    }

    /// An even split of the time left over `calls_left` calls. Time a call
    /// does not use is shared again on the next split.
    pub fn share(&self, calls_left: usize) -> Duration {
        let calls = u32::try_from(calls_left.max(1)).unwrap_or(u32::MAX);
        self.remaining() / calls
    }

    /// Sends `request`, giving up with [`AiError::Timeout`] once `allowance`
    /// or the whole budget has passed. Client retries count against it.
    pub async fn call(
        &self,
        ai: &dyn AiClient,
        mut request: AiRequest,
        allowance: Duration,
    ) -> Result<AiResponse, AiError> {
        let allowance = allowance.min(self.remaining());
        if allowance.is_zero() {
            return Err(AiError::Timeout(Duration::ZERO));
        }
        request.timeout = request.timeout.min(allowance);
        match tokio::time::timeout(allowance, ai.call(request)).await {
            Ok(result) => result,
            Err(_) => Err(AiError::Timeout(allowance)),
        }
    }
}
