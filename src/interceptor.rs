//! Ordered request and response hooks.
//!
//! Request interceptors transform the descriptor before anything is sent.
//! Response interceptors see the outcome of the call as a `Result` and
//! run in registration order: a success goes through
//! [`ResponseInterceptor::on_response`], a failure through
//! [`ResponseInterceptor::on_error`], which may hand back a recovered
//! response. Whatever an interceptor returns is what the next one sees.

use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc, Mutex, Weak,
};

use async_trait::async_trait;

use crate::{util::lock_unpoisoned, ApiError, ApiResponse, Payload, RequestDescriptor, Result};

/// Transforms a descriptor before it is dispatched.
///
/// Returning an error aborts the call before any network activity.
#[async_trait]
pub trait RequestInterceptor: Send + Sync {
    async fn intercept(&self, request: RequestDescriptor) -> Result<RequestDescriptor>;
}

#[async_trait]
impl<F> RequestInterceptor for F
where
    F: Fn(RequestDescriptor) -> Result<RequestDescriptor> + Send + Sync,
{
    async fn intercept(&self, request: RequestDescriptor) -> Result<RequestDescriptor> {
        self(request)
    }
}

/// Result of an error hook.
#[derive(Debug)]
pub enum ErrorOutcome {
    /// Keep failing with this error (possibly a different one).
    Propagate(ApiError),
    /// Treat the call as successful with this response.
    Recover(ApiResponse<Payload>),
}

/// Observes and rewrites call outcomes. Both hooks default to pass-through.
#[async_trait]
pub trait ResponseInterceptor: Send + Sync {
    async fn on_response(&self, response: ApiResponse<Payload>) -> Result<ApiResponse<Payload>> {
        Ok(response)
    }

    async fn on_error(&self, error: ApiError) -> ErrorOutcome {
        ErrorOutcome::Propagate(error)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Stage {
    Request,
    Response,
}

struct Registered<T: ?Sized> {
    id: u64,
    hook: Arc<T>,
}

impl<T: ?Sized> Clone for Registered<T> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            hook: Arc::clone(&self.hook),
        }
    }
}

/// Both interceptor lists of one client.
#[derive(Default)]
pub(crate) struct InterceptorChain {
    next_id: AtomicU64,
    request: Mutex<Vec<Registered<dyn RequestInterceptor>>>,
    response: Mutex<Vec<Registered<dyn ResponseInterceptor>>>,
}

impl InterceptorChain {
    pub(crate) fn add_request(
        self: &Arc<Self>,
        hook: Arc<dyn RequestInterceptor>,
    ) -> InterceptorHandle {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        lock_unpoisoned(&self.request).push(Registered { id, hook });
        self.handle(Stage::Request, id)
    }

    pub(crate) fn add_response(
        self: &Arc<Self>,
        hook: Arc<dyn ResponseInterceptor>,
    ) -> InterceptorHandle {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        lock_unpoisoned(&self.response).push(Registered { id, hook });
        self.handle(Stage::Response, id)
    }

    pub(crate) async fn apply_request(&self, mut request: RequestDescriptor) -> Result<RequestDescriptor> {
        // Snapshot so hooks can register or remove interceptors while running.
        let hooks = lock_unpoisoned(&self.request).clone();
        for registered in hooks {
            request = registered.hook.intercept(request).await?;
        }
        Ok(request)
    }

    pub(crate) async fn apply_response(
        &self,
        mut outcome: Result<ApiResponse<Payload>>,
    ) -> Result<ApiResponse<Payload>> {
        let hooks = lock_unpoisoned(&self.response).clone();
        for registered in hooks {
            outcome = match outcome {
                Ok(response) => registered.hook.on_response(response).await,
                Err(error) => match registered.hook.on_error(error).await {
                    ErrorOutcome::Propagate(error) => Err(error),
                    ErrorOutcome::Recover(response) => Ok(response),
                },
            };
        }
        outcome
    }

    #[cfg(test)]
    fn len(&self) -> (usize, usize) {
        (
            lock_unpoisoned(&self.request).len(),
            lock_unpoisoned(&self.response).len(),
        )
    }

    fn remove(&self, stage: Stage, id: u64) -> bool {
        match stage {
            Stage::Request => remove_by_id(&mut lock_unpoisoned(&self.request), id),
            Stage::Response => remove_by_id(&mut lock_unpoisoned(&self.response), id),
        }
    }

    fn handle(self: &Arc<Self>, stage: Stage, id: u64) -> InterceptorHandle {
        InterceptorHandle {
            chain: Arc::downgrade(self),
            stage,
            id,
        }
    }
}

fn remove_by_id<T: ?Sized>(hooks: &mut Vec<Registered<T>>, id: u64) -> bool {
    let before = hooks.len();
    hooks.retain(|registered| registered.id != id);
    hooks.len() != before
}

/// Deregistration capability returned when an interceptor is added.
///
/// Dropping the handle keeps the interceptor installed.
#[derive(Debug)]
pub struct InterceptorHandle {
    chain: Weak<InterceptorChain>,
    stage: Stage,
    id: u64,
}

impl InterceptorHandle {
    /// Removes the interceptor. Returns `false` if it was already gone or
    /// the client has been dropped.
    pub fn remove(self) -> bool {
        self.chain
            .upgrade()
            .is_some_and(|chain| chain.remove(self.stage, self.id))
    }
}
