use crate::envelope::{Request, Response};
use async_trait::async_trait;

/// The user-supplied request handler: one function from request to response.
///
/// Ping requests never reach the handler - the server pipeline answers them
/// itself. A handler error is logged by the pipeline and produces no
/// response; it never tears the pipeline down.
#[async_trait]
pub trait RequestHandler: Send + Sync + 'static {
    async fn handle(&self, request: Request) -> anyhow::Result<Response>;
}

/// Plain functions and closures are handlers.
#[async_trait]
impl<F> RequestHandler for F
where
    F: Fn(Request) -> anyhow::Result<Response> + Send + Sync + 'static,
{
    async fn handle(&self, request: Request) -> anyhow::Result<Response> {
        self(request)
    }
}
